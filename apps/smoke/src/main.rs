use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use futures::{stream, StreamExt};
use session_core::{
    ConnectorCell, ConversationMetadata, ConversationStream, IdentifierKind, MessageStream,
    MessagingClient, MessagingConnector, RemoteSigner, SessionController, SessionEvent,
    SignerIdentifier, StreamManager, StreamedMessage,
};
use shared::domain::{AccountAddress, ConversationId, InboxId, InstallationId, SessionRecord};
use storage::{FilePreferenceStore, InstanceLock, LocalDbRegistry, SessionCache};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;

/// Exercises the full session lifecycle against an in-process demo backend:
/// restore (or fresh login), a couple of streamed items, then logout.
#[derive(Parser, Debug)]
struct Args {
    /// Profile directory holding the lock file and preference blob.
    /// Overrides APP__PROFILE_DIR.
    #[arg(long)]
    profile_dir: Option<PathBuf>,
    /// Address the demo signer reports.
    #[arg(long, default_value = "0xFEED")]
    address: String,
    /// Keep the cached session on exit instead of logging out, so the next
    /// run exercises restoration.
    #[arg(long)]
    keep_session: bool,
}

static CONNECTOR: ConnectorCell = ConnectorCell::new();

struct DemoClient {
    inbox_id: InboxId,
}

#[async_trait]
impl MessagingClient for DemoClient {
    fn inbox_id(&self) -> InboxId {
        self.inbox_id.clone()
    }

    fn installation_id(&self) -> InstallationId {
        InstallationId("demo-install".into())
    }

    async fn verify_registration(&self) -> Result<()> {
        Ok(())
    }

    async fn open_conversation_stream(&self) -> Result<ConversationStream> {
        let first = ConversationMetadata {
            conversation_id: ConversationId(format!("conv-{}", Uuid::new_v4())),
            peer_address: Some(AccountAddress::new("0xpeer")),
            created_at: Utc::now(),
        };
        Ok(stream::iter(vec![Ok(first)]).chain(stream::pending()).boxed())
    }

    async fn open_message_stream(&self) -> Result<MessageStream> {
        let first = StreamedMessage {
            conversation_id: ConversationId("conv-demo".into()),
            sender_inbox_id: InboxId("inbox-peer".into()),
            sent_at: Utc::now(),
            content: "hello from the demo backend".into(),
        };
        Ok(stream::iter(vec![Ok(first)]).chain(stream::pending()).boxed())
    }

    async fn sync_all(&self) -> Result<()> {
        Ok(())
    }
}

struct DemoConnector;

#[async_trait]
impl MessagingConnector for DemoConnector {
    async fn build(&self, record: &SessionRecord) -> Result<Arc<dyn MessagingClient>> {
        info!(inbox_id = %record.inbox_id, "demo: rebuilding client from cached identity");
        Ok(Arc::new(DemoClient {
            inbox_id: record.inbox_id.clone(),
        }))
    }

    async fn create(&self, signer: &dyn RemoteSigner) -> Result<Arc<dyn MessagingClient>> {
        let identifier = signer.get_identifier().await?;
        let address = AccountAddress::new(&identifier.identifier);
        info!(address = %address, "demo: registering fresh identity");
        Ok(Arc::new(DemoClient {
            inbox_id: InboxId(format!("inbox-{address}")),
        }))
    }
}

struct DemoSigner {
    address: String,
}

#[async_trait]
impl RemoteSigner for DemoSigner {
    async fn get_identifier(&self) -> Result<SignerIdentifier> {
        Ok(SignerIdentifier {
            identifier: self.address.clone(),
            kind: IdentifierKind::Ethereum,
        })
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(message.to_vec())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let settings = config::load_settings();
    let profile_dir = args
        .profile_dir
        .clone()
        .unwrap_or_else(|| settings.profile_dir.clone());

    let connector = CONNECTOR
        .get_or_init(|| async { Ok(Arc::new(DemoConnector) as Arc<dyn MessagingConnector>) })
        .await?;

    let preferences: Arc<dyn storage::PreferenceStore> =
        Arc::new(FilePreferenceStore::new(&profile_dir));
    let lock = Arc::new(InstanceLock::new(&profile_dir).with_staleness(settings.lock_staleness()));
    let (backoff_base, backoff_cap) = settings.backoff();
    let controller = SessionController::new_with_dependencies(
        connector,
        SessionCache::new(preferences),
        LocalDbRegistry::new(&profile_dir),
        lock,
        StreamManager::with_backoff(backoff_base, backoff_cap),
    );
    let mut events = controller.streams().subscribe();

    if controller.restore_session().await? {
        println!("restored cached session");
    } else {
        let signer = DemoSigner {
            address: args.address.clone(),
        };
        controller.initialize_with_signer(&signer).await?;
        println!("established session for {}", args.address);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(SessionEvent::ConversationStreamed(conversation)) => {
                    println!("conversation: {}", conversation.conversation_id);
                }
                Ok(SessionEvent::MessageStreamed(message)) => {
                    println!("message in {}: {}", message.conversation_id, message.content);
                }
                Ok(SessionEvent::HealthChanged(snapshot)) => {
                    println!(
                        "health: {:?} (polling fallback: {})",
                        snapshot.health, snapshot.polling_fallback
                    );
                }
                Ok(SessionEvent::StreamError(err)) => println!("stream error: {err}"),
                Err(_) => break,
            }
        }
    }

    if args.keep_session {
        println!("keeping session; next run will restore it");
    } else {
        controller.logout().await?;
        println!("logged out");
    }
    Ok(())
}
