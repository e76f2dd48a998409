use std::{env, path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct Settings {
    pub profile_dir: PathBuf,
    pub lock_staleness_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile_dir: PathBuf::from(".smoke-profile"),
            lock_staleness_secs: 30,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
        }
    }
}

impl Settings {
    /// Staleness window for the instance lock; floored at one second so a
    /// misconfigured zero cannot make every live lock instantly stale.
    pub fn lock_staleness(&self) -> Duration {
        Duration::from_secs(self.lock_staleness_secs.max(1))
    }

    /// Base and cap for the reconnect backoff. A cap below the base is
    /// raised to the base.
    pub fn backoff(&self) -> (Duration, Duration) {
        let base = Duration::from_millis(self.backoff_base_ms.max(1));
        let cap = Duration::from_millis(self.backoff_cap_ms).max(base);
        (base, cap)
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(v) = env::var("APP__PROFILE_DIR") {
        settings.profile_dir = PathBuf::from(v);
    }
    if let Ok(v) = env::var("APP__LOCK_STALENESS_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.lock_staleness_secs = parsed;
        }
    }
    if let Ok(v) = env::var("APP__BACKOFF_BASE_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff_base_ms = parsed;
        }
    }
    if let Ok(v) = env::var("APP__BACKOFF_CAP_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff_cap_ms = parsed;
        }
    }

    settings
}
