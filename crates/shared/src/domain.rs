use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id_newtype!(InboxId);
string_id_newtype!(ConversationId);
string_id_newtype!(InstallationId);

/// Account identifier used to authenticate, distinct from the inbox id.
///
/// Invariant: always lowercase. Construction and deserialization both
/// normalize, so comparing two `AccountAddress` values is comparing their
/// canonical forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AccountAddress {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The last known registered identity. Created on fresh registration,
/// timestamp bumped on every successful restoration, deleted on logout or
/// destructive recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub address: AccountAddress,
    pub inbox_id: InboxId,
    pub timestamp: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(address: AccountAddress, inbox_id: InboxId) -> Self {
        Self {
            address,
            inbox_id,
            timestamp: Utc::now(),
        }
    }
}

/// The small JSON blob held by the preference store. Encryption at rest is
/// the host platform's concern; this type only models the payload.
///
/// `pending_db_clear` is the durable marker for corruption detected at a
/// point where destructive cleanup had to be deferred until the next safe
/// restart point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureData {
    #[serde(default)]
    pub session: Option<SessionRecord>,
    #[serde(default)]
    pub pending_db_clear: bool,
    #[serde(default)]
    pub nicknames: BTreeMap<String, String>,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
}

/// Token serialized into the shared lock file. At most one app instance may
/// hold a non-stale token; the holder refreshes `acquired_at` via a
/// heartbeat so a crashed holder becomes reclaimable after the staleness
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLockToken {
    pub owner: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl InstanceLockToken {
    pub fn new(owner: Uuid) -> Self {
        Self {
            owner,
            acquired_at: Utc::now(),
        }
    }

    /// A token from the future (clock skew) is treated as live.
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        let window =
            chrono::Duration::from_std(staleness).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.acquired_at) > window
    }
}

/// Coarse connection health derived from stream manager state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamHealth {
    Healthy,
    Degraded,
    Reconnecting,
    Offline,
}

/// Health value plus whether a polling sync is currently substituting for
/// the live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub health: StreamHealth,
    pub polling_fallback: bool,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            health: StreamHealth::Healthy,
            polling_fallback: false,
        }
    }
}

/// Outcome of a full local-database wipe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub success: bool,
    pub failed_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_address_normalizes_to_lowercase() {
        let address = AccountAddress::new("  0xAbCdEf0123 ");
        assert_eq!(address.as_str(), "0xabcdef0123");
        assert_eq!(address, AccountAddress::new("0xABCDEF0123"));
    }

    #[test]
    fn account_address_deserialization_normalizes() {
        let address: AccountAddress = serde_json::from_str("\"0xABC\"").expect("deserialize");
        assert_eq!(address.as_str(), "0xabc");
    }

    #[test]
    fn secure_data_defaults_missing_fields() {
        let data: SecureData = serde_json::from_str("{}").expect("deserialize");
        assert!(data.session.is_none());
        assert!(!data.pending_db_clear);
        assert!(data.nicknames.is_empty());
    }

    #[test]
    fn lock_token_staleness_honors_window() {
        let token = InstanceLockToken::new(Uuid::new_v4());
        let now = token.acquired_at;
        assert!(!token.is_stale(now, Duration::from_secs(30)));
        assert!(!token.is_stale(now + chrono::Duration::seconds(29), Duration::from_secs(30)));
        assert!(token.is_stale(now + chrono::Duration::seconds(31), Duration::from_secs(30)));
    }

    #[test]
    fn lock_token_from_the_future_is_not_stale() {
        let token = InstanceLockToken::new(Uuid::new_v4());
        let now = token.acquired_at - chrono::Duration::seconds(120);
        assert!(!token.is_stale(now, Duration::from_secs(30)));
    }
}
