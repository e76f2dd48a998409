use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use shared::domain::{AccountAddress, ConversationId, InboxId, InstallationId, SessionRecord};

pub mod classify;
pub mod connector_cell;
pub mod controller;
pub mod error;
pub mod stream_manager;

pub use classify::{classify_failure, FailureClass};
pub use connector_cell::ConnectorCell;
pub use controller::{LastError, LifecyclePhase, SessionController};
pub use error::{SessionError, SessionErrorKind};
pub use stream_manager::{SessionEvent, StreamManager};

/// Conversation metadata delivered by the conversation stream or injected
/// for a just-created conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMetadata {
    pub conversation_id: ConversationId,
    pub peer_address: Option<AccountAddress>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedMessage {
    pub conversation_id: ConversationId,
    pub sender_inbox_id: InboxId,
    pub sent_at: DateTime<Utc>,
    pub content: String,
}

pub type ConversationStream = BoxStream<'static, Result<ConversationMetadata>>;
pub type MessageStream = BoxStream<'static, Result<StreamedMessage>>;

/// A constructed messaging client. Verification is a network round trip
/// that only succeeds once the identity's registration completed;
/// `sync_all` is the polling fallback used when live streaming degrades.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    fn inbox_id(&self) -> InboxId;
    fn installation_id(&self) -> InstallationId;
    async fn verify_registration(&self) -> Result<()>;
    async fn open_conversation_stream(&self) -> Result<ConversationStream>;
    async fn open_message_stream(&self) -> Result<MessageStream>;
    async fn sync_all(&self) -> Result<()>;
}

/// Client construction seam. `build` reconstructs from a cached identity
/// with no signer interaction; `create` registers a fresh installation and
/// involves a user-facing signature. Both may fail with SDK-specific error
/// text, which is what `classify_failure` sees.
#[async_trait]
pub trait MessagingConnector: Send + Sync {
    async fn build(&self, record: &SessionRecord) -> Result<Arc<dyn MessagingClient>>;
    async fn create(&self, signer: &dyn RemoteSigner) -> Result<Arc<dyn MessagingClient>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Ethereum,
    Passkey,
}

#[derive(Debug, Clone)]
pub struct SignerIdentifier {
    pub identifier: String,
    pub kind: IdentifierKind,
}

/// External auth/wallet collaborator.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    async fn get_identifier(&self) -> Result<SignerIdentifier>;
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

pub struct MissingMessagingConnector;

#[async_trait]
impl MessagingConnector for MissingMessagingConnector {
    async fn build(&self, record: &SessionRecord) -> Result<Arc<dyn MessagingClient>> {
        Err(anyhow!(
            "messaging backend unavailable for inbox {}",
            record.inbox_id
        ))
    }

    async fn create(&self, _signer: &dyn RemoteSigner) -> Result<Arc<dyn MessagingClient>> {
        Err(anyhow!("messaging backend unavailable for registration"))
    }
}
