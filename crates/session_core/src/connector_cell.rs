use std::{future::Future, sync::Arc};

use anyhow::Result;
use tokio::sync::OnceCell;

use crate::MessagingConnector;

/// Process-wide lazily-initialized connector slot. Concurrent first callers
/// share a single pending initialization instead of racing to construct the
/// SDK twice; a failed initialization leaves the cell empty so the next
/// caller retries.
pub struct ConnectorCell {
    cell: OnceCell<Arc<dyn MessagingConnector>>,
}

impl ConnectorCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<dyn MessagingConnector>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn MessagingConnector>>>,
    {
        self.cell.get_or_try_init(init).await.cloned()
    }

    pub fn get(&self) -> Option<Arc<dyn MessagingConnector>> {
        self.cell.get().cloned()
    }
}

impl Default for ConnectorCell {
    fn default() -> Self {
        Self::new()
    }
}
