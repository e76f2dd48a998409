use std::{fs, time::Duration};

use chrono::Utc;
use shared::domain::InstanceLockToken;
use uuid::Uuid;

use crate::InstanceLock;

#[test]
fn second_instance_fails_while_first_holds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = InstanceLock::new(dir.path());
    let second = InstanceLock::new(dir.path());

    assert!(first.acquire().expect("first acquire"));
    assert!(!second.acquire().expect("second acquire"));
    assert!(second.is_locked_by_another().expect("locked check"));
    assert!(!first.is_locked_by_another().expect("own lock check"));
}

#[test]
fn release_allows_another_instance_to_acquire() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = InstanceLock::new(dir.path());
    let second = InstanceLock::new(dir.path());

    assert!(first.acquire().expect("first acquire"));
    first.release().expect("release");
    assert!(second.acquire().expect("second acquire"));
}

#[test]
fn release_is_idempotent_and_never_steals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = InstanceLock::new(dir.path());
    let second = InstanceLock::new(dir.path());

    assert!(first.acquire().expect("acquire"));
    second.release().expect("release of unheld lock");
    assert!(second.is_locked_by_another().expect("still held"));

    first.release().expect("release");
    first.release().expect("release again");
}

#[test]
fn reacquire_by_same_owner_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock = InstanceLock::new(dir.path());
    assert!(lock.acquire().expect("acquire"));
    assert!(lock.acquire().expect("reacquire"));
}

#[test]
fn stale_token_is_reclaimable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock = InstanceLock::new(dir.path()).with_staleness(Duration::from_secs(30));

    let crashed = InstanceLockToken {
        owner: Uuid::new_v4(),
        acquired_at: Utc::now() - chrono::Duration::minutes(5),
    };
    fs::write(
        dir.path().join("session.lock"),
        serde_json::to_string(&crashed).expect("serialize"),
    )
    .expect("seed stale token");

    assert!(!lock.is_locked_by_another().expect("stale is not held"));
    assert!(lock.acquire().expect("reclaim"));
}

#[test]
fn live_foreign_token_is_not_reclaimable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock = InstanceLock::new(dir.path()).with_staleness(Duration::from_secs(30));

    let holder = InstanceLockToken::new(Uuid::new_v4());
    fs::write(
        dir.path().join("session.lock"),
        serde_json::to_string(&holder).expect("serialize"),
    )
    .expect("seed live token");

    assert!(!lock.acquire().expect("acquire against live holder"));
}

#[test]
fn garbage_token_is_treated_as_free() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock = InstanceLock::new(dir.path());
    fs::write(dir.path().join("session.lock"), b"not a token").expect("seed garbage");
    assert!(lock.acquire().expect("acquire over garbage"));
}

#[test]
fn refresh_bumps_timestamp_and_detects_reclaim() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock = InstanceLock::new(dir.path());
    assert!(lock.acquire().expect("acquire"));

    let before: InstanceLockToken = serde_json::from_str(
        &fs::read_to_string(dir.path().join("session.lock")).expect("read"),
    )
    .expect("parse");
    lock.refresh().expect("refresh");
    let after: InstanceLockToken = serde_json::from_str(
        &fs::read_to_string(dir.path().join("session.lock")).expect("read"),
    )
    .expect("parse");
    assert!(after.acquired_at >= before.acquired_at);

    // Simulate another instance reclaiming: refresh must fail loudly.
    let thief = InstanceLockToken::new(Uuid::new_v4());
    fs::write(
        dir.path().join("session.lock"),
        serde_json::to_string(&thief).expect("serialize"),
    )
    .expect("overwrite");
    assert!(lock.refresh().is_err());
}
