use std::{path::Path, sync::Arc};

use anyhow::Result;
use shared::domain::{AccountAddress, SessionRecord};
use storage::{InstanceLock, LocalDbRegistry, PreferenceStore, SessionCache};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    classify::{classify_failure, FailureClass},
    error::{SessionError, SessionErrorKind},
    MessagingClient, MessagingConnector, RemoteSigner, StreamManager,
};

/// Authoritative lifecycle state. A single phase value decides whether a
/// new operation may start, instead of ad hoc re-entrancy flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    Initializing,
    Ready,
    Errored,
}

/// Snapshot of the most recent failure, kept cheap to clone for UI reads.
#[derive(Debug, Clone)]
pub struct LastError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl LastError {
    fn describe(err: &SessionError) -> Self {
        let message = match err {
            SessionError::Transient(source) => format!("{source:#}"),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
        }
    }
}

struct ControllerState {
    phase: LifecyclePhase,
    client: Option<Arc<dyn MessagingClient>>,
    last_error: Option<LastError>,
}

/// Orchestrates creation and restoration of the messaging client: session
/// caching, instance-lock exclusivity, registration verification, and
/// corruption recovery. Exactly one live client per controller; ownership
/// is exclusive to the instance holding the lock.
pub struct SessionController {
    connector: Arc<dyn MessagingConnector>,
    cache: SessionCache,
    local_db: LocalDbRegistry,
    lock: Arc<InstanceLock>,
    streams: Arc<StreamManager>,
    state: Mutex<ControllerState>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn MessagingConnector>,
        preferences: Arc<dyn PreferenceStore>,
        profile_dir: &Path,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            connector,
            SessionCache::new(preferences),
            LocalDbRegistry::new(profile_dir),
            Arc::new(InstanceLock::new(profile_dir)),
            StreamManager::new(),
        )
    }

    pub fn new_with_dependencies(
        connector: Arc<dyn MessagingConnector>,
        cache: SessionCache,
        local_db: LocalDbRegistry,
        lock: Arc<InstanceLock>,
        streams: Arc<StreamManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            cache,
            local_db,
            lock,
            streams,
            state: Mutex::new(ControllerState {
                phase: LifecyclePhase::Idle,
                client: None,
                last_error: None,
            }),
            heartbeat: Mutex::new(None),
        })
    }

    pub async fn phase(&self) -> LifecyclePhase {
        self.state.lock().await.phase
    }

    pub async fn client(&self) -> Option<Arc<dyn MessagingClient>> {
        self.state.lock().await.client.clone()
    }

    pub async fn last_error(&self) -> Option<LastError> {
        self.state.lock().await.last_error.clone()
    }

    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.streams
    }

    /// Reconstructs the client from the cached identity, with no signer
    /// interaction; runs on every app start. Returns true iff a live client
    /// is now installed. The only error it ever propagates is `TabLocked`;
    /// every other failure is recorded on the controller state so a retry
    /// can succeed without data loss.
    pub async fn restore_session(self: &Arc<Self>) -> Result<bool, SessionError> {
        {
            let mut state = self.state.lock().await;
            match state.phase {
                LifecyclePhase::Ready => return Ok(true),
                LifecyclePhase::Initializing => return Ok(false),
                LifecyclePhase::Idle | LifecyclePhase::Errored => {
                    state.phase = LifecyclePhase::Initializing;
                    state.last_error = None;
                }
            }
        }

        let result = self.restore_session_inner().await;

        let mut state = self.state.lock().await;
        match &result {
            Ok(true) => state.phase = LifecyclePhase::Ready,
            Ok(false) => {
                state.phase = if state.last_error.is_some() {
                    LifecyclePhase::Errored
                } else {
                    LifecyclePhase::Idle
                };
            }
            Err(err) => {
                state.phase = LifecyclePhase::Errored;
                state.last_error = Some(LastError::describe(err));
            }
        }
        result
    }

    async fn restore_session_inner(self: &Arc<Self>) -> Result<bool, SessionError> {
        // The deferred corruption cleanup must run before anything else
        // touches the database: client construction against a corrupted
        // image fails or worsens the corruption.
        match self.cache.pending_db_clear().await {
            Ok(true) => return self.execute_deferred_cleanup().await,
            Ok(false) => {}
            Err(err) => {
                self.record_error(SessionError::Transient(err)).await;
                return Ok(false);
            }
        }

        let record = match self.cache.load().await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(false),
            Err(err) => {
                self.record_error(SessionError::Transient(err)).await;
                return Ok(false);
            }
        };

        match self.lock.acquire() {
            Ok(true) => {}
            Ok(false) => return Err(SessionError::TabLocked),
            Err(err) => {
                self.record_error(SessionError::Transient(err)).await;
                return Ok(false);
            }
        }

        let client = match self.connector.build(&record).await {
            Ok(client) => client,
            Err(err) => {
                self.release_lock();
                return self.handle_restore_build_failure(&record, err).await;
            }
        };

        if let Err(err) = client.verify_registration().await {
            let text = format!("{err:#}");
            match classify_failure(&text) {
                FailureClass::TabLocked => {
                    // Another instance owns the database; session data is
                    // left exactly as it was.
                    self.release_lock();
                    return Err(SessionError::TabLocked);
                }
                FailureClass::Unregistered => {
                    self.release_lock();
                    self.discard_identity(&record).await;
                    self.record_error(SessionError::IdentityUnregistered).await;
                    return Ok(false);
                }
                FailureClass::Corrupted => {
                    // Destructive cleanup is deferred to the next start;
                    // the session record stays until the wipe runs.
                    if let Err(mark_err) = self.cache.set_pending_db_clear(true).await {
                        warn!("session: failed to persist cleanup marker: {mark_err:#}");
                    }
                    self.release_lock();
                    self.record_error(SessionError::DatabaseCorrupted).await;
                    return Ok(false);
                }
                FailureClass::DatabaseGone | FailureClass::Transient => {
                    warn!(
                        inbox_id = %record.inbox_id,
                        "session: verification failed, continuing with cached session: {text}"
                    );
                }
            }
        }

        self.install_client(Arc::clone(&client)).await;

        // Timestamp bump and stream startup are background work; neither
        // blocks client readiness.
        let cache = self.cache.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.refresh_timestamp().await {
                warn!("session: failed to refresh session timestamp: {err:#}");
            }
        });
        let streams = Arc::clone(&self.streams);
        tokio::spawn(async move { streams.initialize(client).await });

        info!(inbox_id = %record.inbox_id, "session: restored");
        Ok(true)
    }

    async fn execute_deferred_cleanup(&self) -> Result<bool, SessionError> {
        let report = match self.local_db.delete_all() {
            Ok(report) => report,
            Err(err) => {
                // The marker stays set so the wipe is retried next start.
                self.record_error(SessionError::Transient(err)).await;
                return Ok(false);
            }
        };
        if !report.success {
            warn!(failed_files = ?report.failed_files, "session: cleanup left files behind");
        }
        if let Err(err) = self.cache.clear().await {
            self.record_error(SessionError::Transient(err)).await;
            return Ok(false);
        }
        if let Err(err) = self.cache.set_pending_db_clear(false).await {
            self.record_error(SessionError::Transient(err)).await;
            return Ok(false);
        }
        info!("session: deferred database cleanup executed, fresh login required");
        Ok(false)
    }

    async fn handle_restore_build_failure(
        &self,
        record: &SessionRecord,
        err: anyhow::Error,
    ) -> Result<bool, SessionError> {
        match classify_failure(&format!("{err:#}")) {
            FailureClass::TabLocked => Err(SessionError::TabLocked),
            FailureClass::DatabaseGone => {
                // The database is confirmedly absent; the record points at
                // nothing restorable.
                if let Err(clear_err) = self.cache.clear().await {
                    warn!("session: failed to clear stale session record: {clear_err:#}");
                }
                self.record_error(SessionError::DatabaseGone).await;
                Ok(false)
            }
            FailureClass::Corrupted => {
                if let Err(mark_err) = self.cache.set_pending_db_clear(true).await {
                    warn!("session: failed to persist cleanup marker: {mark_err:#}");
                }
                self.record_error(SessionError::DatabaseCorrupted).await;
                Ok(false)
            }
            FailureClass::Unregistered => {
                self.discard_identity(record).await;
                self.record_error(SessionError::IdentityUnregistered).await;
                Ok(false)
            }
            FailureClass::Transient => {
                // Unclassified failures keep the session intact so a retry
                // can succeed without re-registering.
                self.record_error(SessionError::Transient(err)).await;
                Ok(false)
            }
        }
    }

    /// Establishes a session through an external signer. Reuses the cached
    /// registered identity when the signer resolves to the same address;
    /// anything else is a logically fresh login and registers a new
    /// installation.
    pub async fn initialize_with_signer(
        self: &Arc<Self>,
        signer: &dyn RemoteSigner,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            match state.phase {
                LifecyclePhase::Ready | LifecyclePhase::Initializing => return Ok(()),
                LifecyclePhase::Idle | LifecyclePhase::Errored => {
                    state.phase = LifecyclePhase::Initializing;
                    state.last_error = None;
                }
            }
        }

        let result = self.initialize_with_signer_inner(signer).await;

        let mut state = self.state.lock().await;
        match &result {
            Ok(()) => state.phase = LifecyclePhase::Ready,
            Err(err) => {
                state.phase = LifecyclePhase::Errored;
                state.last_error = Some(LastError::describe(err));
            }
        }
        result
    }

    async fn initialize_with_signer_inner(
        self: &Arc<Self>,
        signer: &dyn RemoteSigner,
    ) -> Result<(), SessionError> {
        match self.lock.acquire() {
            Ok(true) => {}
            Ok(false) => return Err(SessionError::TabLocked),
            Err(err) => return Err(SessionError::Transient(err)),
        }

        match self.login_locked(signer).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.release_lock();
                Err(err)
            }
        }
    }

    async fn login_locked(
        self: &Arc<Self>,
        signer: &dyn RemoteSigner,
    ) -> Result<(), SessionError> {
        let identifier = signer
            .get_identifier()
            .await
            .map_err(SessionError::Transient)?;
        let address = AccountAddress::new(&identifier.identifier);

        let cached = self.cache.load().await.map_err(SessionError::Transient)?;

        // Reconstruction must never silently fall through to creation: a
        // redundant installation counts against the per-identity quota,
        // which is capped and sometimes irreversible to exhaust.
        let built = match cached {
            Some(record) if record.address == address => {
                info!(address = %address, "session: reusing registered identity");
                self.connector.build(&record).await
            }
            _ => {
                info!(address = %address, "session: fresh registration");
                self.connector.create(signer).await
            }
        };

        let client = match built {
            Ok(client) => client,
            Err(err) => {
                let classified = SessionError::from_failure(err);
                if classified.kind() == SessionErrorKind::DatabaseCorrupted {
                    if let Err(mark_err) = self.cache.set_pending_db_clear(true).await {
                        warn!("session: failed to persist cleanup marker: {mark_err:#}");
                    }
                }
                return Err(classified);
            }
        };

        if let Err(err) = client.verify_registration().await {
            let text = format!("{err:#}");
            return Err(match classify_failure(&text) {
                FailureClass::TabLocked => SessionError::TabLocked,
                FailureClass::Unregistered => {
                    // A half-registered install must not linger.
                    if let Err(del_err) = self.local_db.delete(&client.inbox_id()) {
                        warn!("session: failed to delete orphaned database: {del_err:#}");
                    }
                    if let Err(clear_err) = self.cache.clear().await {
                        warn!("session: failed to clear session record: {clear_err:#}");
                    }
                    SessionError::IdentityUnregistered
                }
                FailureClass::Corrupted => {
                    if let Err(mark_err) = self.cache.set_pending_db_clear(true).await {
                        warn!("session: failed to persist cleanup marker: {mark_err:#}");
                    }
                    SessionError::DatabaseCorrupted
                }
                FailureClass::DatabaseGone => SessionError::DatabaseGone,
                FailureClass::Transient => SessionError::Transient(err),
            });
        }

        let record = SessionRecord::new(address, client.inbox_id());
        self.cache
            .save(record.clone())
            .await
            .map_err(SessionError::Transient)?;

        self.install_client(Arc::clone(&client)).await;
        let streams = Arc::clone(&self.streams);
        tokio::spawn(async move { streams.initialize(client).await });

        info!(
            address = %record.address,
            inbox_id = %record.inbox_id,
            "session: established"
        );
        Ok(())
    }

    /// Tears the session down: streams stopped, lock released, record
    /// cleared. The local database stays; logout is not destructive.
    pub async fn logout(&self) -> Result<()> {
        if let Some(task) = self.heartbeat.lock().await.take() {
            task.abort();
        }
        self.streams.shutdown().await;
        {
            let mut state = self.state.lock().await;
            state.client = None;
            state.phase = LifecyclePhase::Idle;
            state.last_error = None;
        }
        self.cache.clear().await?;
        self.lock.release()?;
        info!("session: logged out");
        Ok(())
    }

    async fn install_client(self: &Arc<Self>, client: Arc<dyn MessagingClient>) {
        self.state.lock().await.client = Some(client);
        self.start_heartbeat().await;
    }

    async fn start_heartbeat(self: &Arc<Self>) {
        let lock = Arc::clone(&self.lock);
        let interval = lock.staleness() / 3;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = lock.refresh() {
                    warn!("session: lock heartbeat failed: {err:#}");
                }
            }
        });
        if let Some(previous) = self.heartbeat.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn discard_identity(&self, record: &SessionRecord) {
        if let Err(err) = self.local_db.delete(&record.inbox_id) {
            warn!("session: failed to delete orphaned database: {err:#}");
        }
        if let Err(err) = self.cache.clear().await {
            warn!("session: failed to clear session record: {err:#}");
        }
    }

    async fn record_error(&self, err: SessionError) {
        self.state.lock().await.last_error = Some(LastError::describe(&err));
    }

    fn release_lock(&self) {
        if let Err(err) = self.lock.release() {
            warn!("session: failed to release instance lock: {err:#}");
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
