use thiserror::Error;

use crate::classify::{classify_failure, FailureClass};

/// Typed failures surfaced by the lifecycle controller. Callers must handle
/// `TabLocked` and `DatabaseCorrupted` distinctly from everything else: the
/// former means inform the user and do nothing destructive, the latter means
/// destructive recovery is already scheduled for the next restart.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("messaging session is open in another app instance")]
    TabLocked,
    #[error("identity registration never completed; a fresh login is required")]
    IdentityUnregistered,
    #[error("local database is corrupted; restart the app to repair")]
    DatabaseCorrupted,
    #[error("local database is gone; a fresh login is required")]
    DatabaseGone,
    #[error("transient session failure")]
    Transient(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    TabLocked,
    IdentityUnregistered,
    DatabaseCorrupted,
    DatabaseGone,
    Transient,
}

impl SessionError {
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            Self::TabLocked => SessionErrorKind::TabLocked,
            Self::IdentityUnregistered => SessionErrorKind::IdentityUnregistered,
            Self::DatabaseCorrupted => SessionErrorKind::DatabaseCorrupted,
            Self::DatabaseGone => SessionErrorKind::DatabaseGone,
            Self::Transient(_) => SessionErrorKind::Transient,
        }
    }

    /// Maps an opaque collaborator failure onto the taxonomy by message
    /// fingerprint. Unclassified errors stay transient so the session is
    /// never destroyed on a failure we cannot positively identify.
    pub fn from_failure(err: anyhow::Error) -> Self {
        match classify_failure(&format!("{err:#}")) {
            FailureClass::TabLocked => Self::TabLocked,
            FailureClass::Unregistered => Self::IdentityUnregistered,
            FailureClass::Corrupted => Self::DatabaseCorrupted,
            FailureClass::DatabaseGone => Self::DatabaseGone,
            FailureClass::Transient => Self::Transient(err),
        }
    }
}
