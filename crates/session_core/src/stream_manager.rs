use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use rand::Rng;
use shared::domain::{ConversationId, HealthSnapshot, InboxId, StreamHealth};
use tokio::{
    sync::{broadcast, Mutex, Notify},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{ConversationMetadata, MessagingClient, StreamedMessage};

/// Consecutive stream failures before live streaming is declared degraded
/// and the polling fallback takes over.
pub const DEGRADED_AFTER_FAILURES: u32 = 3;
/// Consecutive fallback-sync failures before the connection is declared
/// offline.
pub const OFFLINE_AFTER_FALLBACK_FAILURES: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    HealthChanged(HealthSnapshot),
    ConversationStreamed(ConversationMetadata),
    MessageStreamed(StreamedMessage),
    StreamError(String),
}

#[derive(Default)]
struct StreamState {
    initialized_inbox: Option<InboxId>,
    supervisor: Option<JoinHandle<()>>,
    health: HealthSnapshot,
    consecutive_failures: u32,
    fallback_failures: u32,
    backoff_attempts: u32,
    known_conversations: HashMap<ConversationId, ConversationMetadata>,
}

/// Owns the live network subscriptions for a constructed client, tracks
/// connection health, and drives reconnection with jittered backoff so
/// several instances of the same user do not reconnect in lockstep.
///
/// Health is owned here exclusively; everything else reads it through
/// `health()` or the event stream.
pub struct StreamManager {
    inner: Mutex<StreamState>,
    events: broadcast::Sender<SessionEvent>,
    reconnect_now: Notify,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl StreamManager {
    pub fn new() -> Arc<Self> {
        Self::with_backoff(BACKOFF_BASE, BACKOFF_CAP)
    }

    pub fn with_backoff(base: Duration, cap: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            inner: Mutex::new(StreamState::default()),
            events,
            reconnect_now: Notify::new(),
            backoff_base: base,
            backoff_cap: cap,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn health(&self) -> HealthSnapshot {
        self.inner.lock().await.health
    }

    pub async fn known_conversations(&self) -> Vec<ConversationMetadata> {
        self.inner
            .lock()
            .await
            .known_conversations
            .values()
            .cloned()
            .collect()
    }

    /// Starts streaming for `client`. Idempotent per inbox: a second call
    /// for the inbox already being streamed is a no-op. Subscription
    /// failures are retried internally and never surface to the caller, so
    /// a flaky network cannot block client readiness.
    pub async fn initialize(self: &Arc<Self>, client: Arc<dyn MessagingClient>) {
        let inbox_id = client.inbox_id();
        let previous = {
            let mut state = self.inner.lock().await;
            if state.initialized_inbox.as_ref() == Some(&inbox_id)
                && state
                    .supervisor
                    .as_ref()
                    .is_some_and(|task| !task.is_finished())
            {
                info!(inbox_id = %inbox_id, "stream: already initialized, skipping");
                return;
            }
            let previous = state.supervisor.take();
            state.initialized_inbox = Some(inbox_id.clone());
            state.consecutive_failures = 0;
            state.fallback_failures = 0;
            state.backoff_attempts = 0;
            let manager = Arc::clone(self);
            state.supervisor = Some(tokio::spawn(async move {
                manager.supervise(client).await;
            }));
            previous
        };
        if let Some(task) = previous {
            task.abort();
        }
        info!(inbox_id = %inbox_id, "stream: supervisor started");
    }

    /// Injects a just-created conversation so it is visible immediately
    /// instead of waiting for the next sync cycle.
    pub async fn register_new_conversation(&self, conversation: ConversationMetadata) {
        self.inner
            .lock()
            .await
            .known_conversations
            .insert(conversation.conversation_id.clone(), conversation.clone());
        let _ = self
            .events
            .send(SessionEvent::ConversationStreamed(conversation));
    }

    /// User-triggered retry: resets backoff state and wakes the supervisor.
    /// `notify_one` stores a permit when the supervisor is mid-attempt
    /// (e.g. inside the fallback sync), so a request issued before the
    /// backoff sleep begins still skips it.
    pub async fn manual_reconnect(&self) {
        self.inner.lock().await.backoff_attempts = 0;
        self.reconnect_now.notify_one();
        info!("stream: manual reconnect requested");
    }

    /// Stops streaming and resets health state. Used on logout.
    pub async fn shutdown(&self) {
        let task = {
            let mut state = self.inner.lock().await;
            let task = state.supervisor.take();
            *state = StreamState::default();
            task
        };
        if let Some(task) = task {
            task.abort();
        }
        info!("stream: shut down");
    }

    async fn supervise(self: Arc<Self>, client: Arc<dyn MessagingClient>) {
        loop {
            let outcome = self.run_streams(&client).await;
            let err = match outcome {
                Ok(()) => anyhow!("stream ended unexpectedly"),
                Err(err) => err,
            };
            warn!(inbox_id = %client.inbox_id(), "stream: subscription dropped: {err:#}");
            let _ = self.events.send(SessionEvent::StreamError(format!("{err:#}")));

            self.note_stream_failure(&client).await;

            let attempts = self.inner.lock().await.backoff_attempts;
            let delay = self.backoff_delay(attempts);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.reconnect_now.notified() => {}
            }
        }
    }

    /// One streaming attempt: open both subscriptions, report healthy, then
    /// forward items until either stream errors or ends.
    async fn run_streams(&self, client: &Arc<dyn MessagingClient>) -> Result<()> {
        let mut conversations = client
            .open_conversation_stream()
            .await
            .context("failed to open conversation stream")?;
        let mut messages = client
            .open_message_stream()
            .await
            .context("failed to open message stream")?;

        self.mark_healthy().await;

        loop {
            tokio::select! {
                item = conversations.next() => match item {
                    Some(Ok(conversation)) => {
                        self.inner
                            .lock()
                            .await
                            .known_conversations
                            .insert(conversation.conversation_id.clone(), conversation.clone());
                        let _ = self
                            .events
                            .send(SessionEvent::ConversationStreamed(conversation));
                    }
                    Some(Err(err)) => return Err(err.context("conversation stream failed")),
                    None => return Err(anyhow!("conversation stream ended")),
                },
                item = messages.next() => match item {
                    Some(Ok(message)) => {
                        let _ = self.events.send(SessionEvent::MessageStreamed(message));
                    }
                    Some(Err(err)) => return Err(err.context("message stream failed")),
                    None => return Err(anyhow!("message stream ended")),
                },
            }
        }
    }

    async fn mark_healthy(&self) {
        let mut state = self.inner.lock().await;
        state.consecutive_failures = 0;
        state.fallback_failures = 0;
        state.backoff_attempts = 0;
        self.set_health(
            &mut state,
            HealthSnapshot {
                health: StreamHealth::Healthy,
                polling_fallback: false,
            },
        );
    }

    /// Transition rules: healthy -> reconnecting on a drop, reconnecting ->
    /// degraded after repeated failures (fallback polling substitutes for
    /// live streaming), degraded -> offline when even the fallback fails
    /// repeatedly.
    async fn note_stream_failure(&self, client: &Arc<dyn MessagingClient>) {
        let run_fallback = {
            let mut state = self.inner.lock().await;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.backoff_attempts = state.backoff_attempts.saturating_add(1);
            if state.consecutive_failures < DEGRADED_AFTER_FAILURES {
                self.set_health(
                    &mut state,
                    HealthSnapshot {
                        health: StreamHealth::Reconnecting,
                        polling_fallback: false,
                    },
                );
                false
            } else {
                true
            }
        };

        if !run_fallback {
            return;
        }

        let fallback = client.sync_all().await;
        let mut state = self.inner.lock().await;
        match fallback {
            Ok(()) => {
                state.fallback_failures = 0;
                self.set_health(
                    &mut state,
                    HealthSnapshot {
                        health: StreamHealth::Degraded,
                        polling_fallback: true,
                    },
                );
            }
            Err(err) => {
                state.fallback_failures = state.fallback_failures.saturating_add(1);
                warn!("stream: fallback sync failed: {err:#}");
                if state.fallback_failures >= OFFLINE_AFTER_FALLBACK_FAILURES {
                    self.set_health(
                        &mut state,
                        HealthSnapshot {
                            health: StreamHealth::Offline,
                            polling_fallback: false,
                        },
                    );
                } else {
                    self.set_health(
                        &mut state,
                        HealthSnapshot {
                            health: StreamHealth::Degraded,
                            polling_fallback: true,
                        },
                    );
                }
            }
        }
    }

    fn set_health(&self, state: &mut StreamState, snapshot: HealthSnapshot) {
        if state.health == snapshot {
            return;
        }
        info!(
            health = ?snapshot.health,
            polling_fallback = snapshot.polling_fallback,
            "stream: health changed"
        );
        state.health = snapshot;
        let _ = self.events.send(SessionEvent::HealthChanged(snapshot));
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(6);
        let base = self
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap);
        base.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    }
}

#[cfg(test)]
#[path = "tests/stream_manager_tests.rs"]
mod tests;
