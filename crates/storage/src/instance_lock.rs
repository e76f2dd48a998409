use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use shared::domain::InstanceLockToken;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_STALENESS: Duration = Duration::from_secs(30);
const LOCK_FILE_NAME: &str = "session.lock";

/// Mutual exclusion across app instances sharing one profile directory.
///
/// The local session database is unsafe for concurrent writers, so
/// exclusivity is enforced here instead of detected after the fact. Atomic
/// `create_new` is the compare-and-set primitive; reclaiming a stale token
/// is read-then-replace, which two racers can theoretically both win, but
/// only after a crashed holder has already missed a full staleness window
/// of heartbeats.
pub struct InstanceLock {
    path: PathBuf,
    owner: Uuid,
    staleness: Duration,
}

impl InstanceLock {
    pub fn new(profile_dir: &Path) -> Self {
        Self {
            path: profile_dir.join(LOCK_FILE_NAME),
            owner: Uuid::new_v4(),
            staleness: DEFAULT_STALENESS,
        }
    }

    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    pub fn is_locked_by_another(&self) -> Result<bool> {
        match self.read_token()? {
            Some(token) => {
                Ok(token.owner != self.owner && !token.is_stale(Utc::now(), self.staleness))
            }
            None => Ok(false),
        }
    }

    /// Returns true iff the lock is now held by this instance. Re-acquiring
    /// a lock we already hold refreshes it and succeeds.
    pub fn acquire(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create profile directory '{}'", parent.display())
            })?;
        }

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                let token = InstanceLockToken::new(self.owner);
                let serialized =
                    serde_json::to_string(&token).context("failed to serialize lock token")?;
                file.write_all(serialized.as_bytes()).with_context(|| {
                    format!("failed to write lock token to '{}'", self.path.display())
                })?;
                info!(owner = %self.owner, "instance_lock: acquired");
                return Ok(true);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to create lock file '{}'", self.path.display())
                })
            }
        }

        match self.read_token()? {
            Some(token) if token.owner == self.owner => {
                self.write_token()?;
                Ok(true)
            }
            Some(token) if token.is_stale(Utc::now(), self.staleness) => {
                warn!(
                    stale_owner = %token.owner,
                    "instance_lock: reclaiming stale token"
                );
                self.write_token()?;
                Ok(true)
            }
            Some(token) => {
                info!(holder = %token.owner, "instance_lock: held by another instance");
                Ok(false)
            }
            // Token file vanished or was garbage: the slot is free.
            None => {
                self.write_token()?;
                Ok(true)
            }
        }
    }

    /// Heartbeat. Fails if the token is no longer ours, so the holder
    /// notices a reclaimed lock instead of silently coexisting with the new
    /// holder.
    pub fn refresh(&self) -> Result<()> {
        match self.read_token()? {
            Some(token) if token.owner == self.owner => self.write_token(),
            Some(token) => Err(anyhow!(
                "instance lock was reclaimed by {} while held",
                token.owner
            )),
            None => Err(anyhow!("instance lock file disappeared while held")),
        }
    }

    /// Idempotent. Only removes a token this instance owns.
    pub fn release(&self) -> Result<()> {
        match self.read_token()? {
            Some(token) if token.owner == self.owner => {
                match fs::remove_file(&self.path) {
                    Ok(()) => {
                        info!(owner = %self.owner, "instance_lock: released");
                        Ok(())
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(err).with_context(|| {
                        format!("failed to remove lock file '{}'", self.path.display())
                    }),
                }
            }
            _ => Ok(()),
        }
    }

    fn read_token(&self) -> Result<Option<InstanceLockToken>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read lock file '{}'", self.path.display())
                })
            }
        };

        match serde_json::from_str(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!("instance_lock: token is unparseable, treating as free: {err}");
                Ok(None)
            }
        }
    }

    fn write_token(&self) -> Result<()> {
        let token = InstanceLockToken::new(self.owner);
        let serialized =
            serde_json::to_string(&token).context("failed to serialize lock token")?;
        let tmp_path = self.path.with_extension("lock.tmp");
        fs::write(&tmp_path, serialized).with_context(|| {
            format!("failed to write lock token to '{}'", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("failed to move lock token into place at '{}'", self.path.display())
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/instance_lock_tests.rs"]
mod tests;
