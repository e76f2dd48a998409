use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::SecureData;
use tokio::sync::Mutex;
use tracing::warn;

/// Opaque key-value store holding the encrypted preference blob. The host
/// shell owns encryption at rest; callers only see the decoded payload.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self) -> Result<SecureData>;
    async fn set(&self, data: SecureData) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// JSON-file-backed store used by the desktop shell. Writes go through a
/// temp file plus rename so a crash mid-write never leaves a torn blob.
pub struct FilePreferenceStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(profile_dir: &Path) -> Self {
        Self {
            path: profile_dir.join("preferences.json"),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_blob(&self) -> Result<SecureData> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SecureData::default())
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read preference blob at '{}'", self.path.display())
                })
            }
        };

        match serde_json::from_str(&raw) {
            Ok(data) => Ok(data),
            Err(err) => {
                // An unparseable blob is reported as empty rather than an
                // error: startup must not wedge on a damaged preference file,
                // and nothing destructive happens on the empty path.
                warn!(
                    path = %self.path.display(),
                    "preferences: blob is unparseable, treating as absent: {err}"
                );
                Ok(SecureData::default())
            }
        }
    }

    fn write_blob(&self, data: &SecureData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create profile directory '{}'", parent.display())
            })?;
        }

        let serialized =
            serde_json::to_string_pretty(data).context("failed to serialize preference blob")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized).with_context(|| {
            format!("failed to write preference blob to '{}'", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move preference blob into place at '{}'",
                self.path.display()
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self) -> Result<SecureData> {
        let _guard = self.io.lock().await;
        self.read_blob()
    }

    async fn set(&self, data: SecureData) -> Result<()> {
        let _guard = self.io.lock().await;
        self.write_blob(&data)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.io.lock().await;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to clear preference blob at '{}'", self.path.display())
            }),
        }
    }
}

/// In-memory store with call counters, used by tests and the smoke binary.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    data: Mutex<SecureData>,
    get_calls: AtomicU64,
    set_calls: AtomicU64,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(data: SecureData) -> Self {
        Self {
            data: Mutex::new(data),
            get_calls: AtomicU64::new(0),
            set_calls: AtomicU64::new(0),
        }
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self) -> Result<SecureData> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.lock().await.clone())
    }

    async fn set(&self, data: SecureData) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        *self.data.lock().await = data;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        *self.data.lock().await = SecureData::default();
        Ok(())
    }
}
