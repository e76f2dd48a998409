use std::sync::Arc;

use shared::domain::{AccountAddress, InboxId, SecureData, SessionRecord};

use crate::{MemoryPreferenceStore, PreferenceStore as _, SessionCache};

fn record(address: &str, inbox_id: &str) -> SessionRecord {
    SessionRecord::new(AccountAddress::new(address), InboxId(inbox_id.into()))
}

#[tokio::test]
async fn save_then_load_round_trips() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let cache = SessionCache::new(store);

    cache.save(record("0xABC", "in_1")).await.expect("save");
    let loaded = cache.load().await.expect("load").expect("record");
    assert_eq!(loaded.address.as_str(), "0xabc");
    assert_eq!(loaded.inbox_id.as_str(), "in_1");
}

#[tokio::test]
async fn save_preserves_unrelated_blob_fields() {
    let mut seeded = SecureData::default();
    seeded.nicknames.insert("0xdef".into(), "bob".into());
    seeded.feature_flags.insert("payments".into(), true);
    let store = Arc::new(MemoryPreferenceStore::seeded(seeded));
    let cache = SessionCache::new(store.clone());

    cache.save(record("0xabc", "in_1")).await.expect("save");
    cache.clear().await.expect("clear");

    let data = store.get().await.expect("get");
    assert!(data.session.is_none());
    assert_eq!(data.nicknames.get("0xdef").map(String::as_str), Some("bob"));
    assert_eq!(data.feature_flags.get("payments"), Some(&true));
}

#[tokio::test]
async fn refresh_timestamp_bumps_existing_record() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let cache = SessionCache::new(store);

    let mut original = record("0xabc", "in_1");
    original.timestamp = original.timestamp - chrono::Duration::hours(6);
    cache.save(original.clone()).await.expect("save");

    cache.refresh_timestamp().await.expect("refresh");
    let refreshed = cache.load().await.expect("load").expect("record");
    assert!(refreshed.timestamp > original.timestamp);
    assert_eq!(refreshed.address, original.address);
}

#[tokio::test]
async fn refresh_timestamp_without_record_is_a_noop() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let cache = SessionCache::new(store.clone());

    cache.refresh_timestamp().await.expect("refresh");
    assert_eq!(store.set_calls(), 0);
}

#[tokio::test]
async fn pending_db_clear_marker_round_trips() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let cache = SessionCache::new(store);

    assert!(!cache.pending_db_clear().await.expect("read"));
    cache.set_pending_db_clear(true).await.expect("set");
    assert!(cache.pending_db_clear().await.expect("read"));
    cache.set_pending_db_clear(false).await.expect("unset");
    assert!(!cache.pending_db_clear().await.expect("read"));
}

#[tokio::test]
async fn pending_marker_survives_session_clear() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let cache = SessionCache::new(store);

    cache.save(record("0xabc", "in_1")).await.expect("save");
    cache.set_pending_db_clear(true).await.expect("set");
    cache.clear().await.expect("clear");

    assert!(cache.load().await.expect("load").is_none());
    assert!(cache.pending_db_clear().await.expect("read"));
}
