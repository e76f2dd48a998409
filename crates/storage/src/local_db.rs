use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use shared::domain::{CleanupReport, InboxId};
use tracing::{info, warn};

const DB_FILE_PREFIX: &str = "xmtp-";
const DB_FILE_SUFFIX: &str = ".db3";
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Per-identity local database files under the profile directory, addressed
/// by a deterministic filename derived from the inbox id.
#[derive(Clone)]
pub struct LocalDbRegistry {
    root: PathBuf,
}

impl LocalDbRegistry {
    pub fn new(profile_dir: &Path) -> Self {
        Self {
            root: profile_dir.to_path_buf(),
        }
    }

    pub fn db_path(&self, inbox_id: &InboxId) -> PathBuf {
        self.root
            .join(format!("{DB_FILE_PREFIX}{}{DB_FILE_SUFFIX}", inbox_id.as_str()))
    }

    pub fn exists(&self, inbox_id: &InboxId) -> bool {
        self.db_path(inbox_id).exists()
    }

    /// Removes the database and its sidecar files. Returns true iff the main
    /// database file was present.
    pub fn delete(&self, inbox_id: &InboxId) -> Result<bool> {
        let path = self.db_path(inbox_id);
        let existed = remove_if_present(&path)?;
        for suffix in SIDECAR_SUFFIXES {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let _ = remove_if_present(Path::new(&sidecar));
        }
        if existed {
            info!(inbox_id = %inbox_id, "local_db: deleted per-identity database");
        }
        Ok(existed)
    }

    /// Wipes every identity database under the profile directory. Failures
    /// on individual files are collected, not fatal, so a partially locked
    /// directory still gets as clean as it can.
    pub fn delete_all(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            success: true,
            failed_files: Vec::new(),
        };

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to scan profile directory '{}'", self.root.display())
                })
            }
        };

        for entry in entries {
            let entry = entry.context("failed to read profile directory entry")?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_database_artifact(name) {
                continue;
            }
            if let Err(err) = fs::remove_file(entry.path()) {
                warn!(file = name, "local_db: wipe failed for file: {err}");
                report.success = false;
                report.failed_files.push(name.to_string());
            }
        }

        info!(
            success = report.success,
            failed = report.failed_files.len(),
            "local_db: full wipe finished"
        );
        Ok(report)
    }
}

fn is_database_artifact(name: &str) -> bool {
    name.starts_with(DB_FILE_PREFIX)
        && (name.ends_with(DB_FILE_SUFFIX)
            || SIDECAR_SUFFIXES
                .iter()
                .any(|suffix| name.ends_with(&format!("{DB_FILE_SUFFIX}{suffix}"))))
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("failed to delete '{}'", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::write(path, b"x").expect("touch");
    }

    #[test]
    fn db_path_is_deterministic() {
        let registry = LocalDbRegistry::new(Path::new("/profile"));
        let path = registry.db_path(&InboxId("in_1".into()));
        assert_eq!(path, Path::new("/profile/xmtp-in_1.db3"));
    }

    #[test]
    fn delete_removes_database_and_sidecars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = LocalDbRegistry::new(dir.path());
        let inbox = InboxId("in_1".into());

        touch(&registry.db_path(&inbox));
        touch(&dir.path().join("xmtp-in_1.db3-wal"));
        touch(&dir.path().join("xmtp-in_1.db3-shm"));

        assert!(registry.exists(&inbox));
        assert!(registry.delete(&inbox).expect("delete"));
        assert!(!registry.exists(&inbox));
        assert!(!dir.path().join("xmtp-in_1.db3-wal").exists());
        assert!(!registry.delete(&inbox).expect("second delete"));
    }

    #[test]
    fn delete_all_only_touches_database_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = LocalDbRegistry::new(dir.path());

        touch(&dir.path().join("xmtp-in_1.db3"));
        touch(&dir.path().join("xmtp-in_2.db3"));
        touch(&dir.path().join("xmtp-in_2.db3-wal"));
        touch(&dir.path().join("preferences.json"));

        let report = registry.delete_all().expect("delete_all");
        assert!(report.success);
        assert!(report.failed_files.is_empty());
        assert!(!dir.path().join("xmtp-in_1.db3").exists());
        assert!(!dir.path().join("xmtp-in_2.db3-wal").exists());
        assert!(dir.path().join("preferences.json").exists());
    }

    #[test]
    fn delete_all_on_missing_directory_reports_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent");
        let registry = LocalDbRegistry::new(&missing);
        let report = registry.delete_all().expect("delete_all");
        assert!(report.success);
    }
}
