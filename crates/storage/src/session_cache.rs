use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use shared::domain::SessionRecord;
use tracing::debug;

use crate::PreferenceStore;

/// Thin read-modify-write layer over the preference store for the session
/// record and the pending-cleanup marker. Writes merge into the existing
/// blob so nicknames and feature flags survive session churn.
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn PreferenceStore>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<SessionRecord>> {
        let data = self.store.get().await.context("failed to load session record")?;
        Ok(data.session)
    }

    /// The address inside `record` is normalized by construction; no
    /// additional lowering happens here.
    pub async fn save(&self, record: SessionRecord) -> Result<()> {
        let mut data = self.store.get().await?;
        debug!(address = %record.address, inbox_id = %record.inbox_id, "session: record saved");
        data.session = Some(record);
        self.store
            .set(data)
            .await
            .context("failed to persist session record")
    }

    /// Bumps the timestamp of an existing record. A missing record is a
    /// no-op, not an error: the session may have been cleared concurrently.
    pub async fn refresh_timestamp(&self) -> Result<()> {
        let mut data = self.store.get().await?;
        let Some(record) = data.session.as_mut() else {
            return Ok(());
        };
        record.timestamp = Utc::now();
        self.store
            .set(data)
            .await
            .context("failed to refresh session timestamp")
    }

    pub async fn clear(&self) -> Result<()> {
        let mut data = self.store.get().await?;
        if data.session.take().is_none() {
            return Ok(());
        }
        self.store
            .set(data)
            .await
            .context("failed to clear session record")
    }

    pub async fn pending_db_clear(&self) -> Result<bool> {
        let data = self.store.get().await?;
        Ok(data.pending_db_clear)
    }

    pub async fn set_pending_db_clear(&self, pending: bool) -> Result<()> {
        let mut data = self.store.get().await?;
        if data.pending_db_clear == pending {
            return Ok(());
        }
        data.pending_db_clear = pending;
        self.store
            .set(data)
            .await
            .context("failed to persist pending database clear marker")
    }
}

#[cfg(test)]
#[path = "tests/session_cache_tests.rs"]
mod tests;
