pub mod instance_lock;
pub mod local_db;
pub mod preferences;
pub mod session_cache;

pub use instance_lock::InstanceLock;
pub use local_db::LocalDbRegistry;
pub use preferences::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use session_cache::SessionCache;
