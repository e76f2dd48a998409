//! Failure classification over opaque collaborator error text.
//!
//! The messaging SDK exposes no structured error codes, so lock conflicts,
//! corruption, and half-finished registrations can only be told apart from
//! ordinary network failures by message fingerprint. The match is
//! case-insensitive and deliberately narrow: an error that matches nothing
//! stays `Transient`, and transient failures never trigger destructive
//! recovery.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    TabLocked,
    Corrupted,
    Unregistered,
    DatabaseGone,
}

/// Another instance already holds the exclusive storage handle. The storage
/// engine reports this as a handle-creation failure, indistinguishable from
/// fatal conditions without this sniffing.
const TAB_LOCK_FINGERPRINTS: &[&str] = &[
    "syncaccesshandle",
    "access handle",
    "database is locked",
];

/// Client construction succeeded but registration never completed.
const UNREGISTERED_FINGERPRINTS: &[&str] = &[
    "uninitialized identity",
    "register_identity",
    "is not registered",
];

/// The storage engine reports a malformed on-disk image.
const CORRUPTION_FINGERPRINTS: &[&str] = &[
    "disk image is malformed",
    "database disk image",
    "malformed database",
    "corrupt",
];

/// The local database is confirmedly absent (user wiped app storage).
const DATABASE_GONE_FINGERPRINTS: &[&str] = &[
    "no such database file",
    "database file not found",
    "file not found",
];

pub fn classify_failure(message: &str) -> FailureClass {
    let message = message.to_ascii_lowercase();
    let matches = |fingerprints: &[&str]| fingerprints.iter().any(|f| message.contains(f));

    if matches(TAB_LOCK_FINGERPRINTS) {
        return FailureClass::TabLocked;
    }
    if matches(UNREGISTERED_FINGERPRINTS) {
        return FailureClass::Unregistered;
    }
    if matches(CORRUPTION_FINGERPRINTS)
        || (message.contains("welcome error") && message.contains("storage"))
    {
        return FailureClass::Corrupted;
    }
    if matches(DATABASE_GONE_FINGERPRINTS) {
        return FailureClass::DatabaseGone;
    }
    FailureClass::Transient
}
