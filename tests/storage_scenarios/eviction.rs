//! Idle eviction keeps dirty data.

use std::time::{Duration, Instant};

use crate::common::*;

#[test]
fn test_idle_dirty_entries_are_flushed_before_eviction() {
    let h = Harness::new();
    let uuid = h.seed_user("en-GB", "Alex");
    let user = h.users().get(uuid).wait().unwrap().unwrap();
    user.write().set(&UserData::LAST_LOGIN, 7u64).unwrap();
    drop(user);

    let later = Instant::now() + DEFAULT_CACHE_TTL + Duration::from_secs(1);
    let report = h.users().evict_idle(later);

    assert_eq!(report.flushed, 1);
    assert_eq!(report.evicted, 1);
    assert!(h.users().peek(&uuid).is_none());
    assert!(!h.users().is_dirty(&uuid));
    assert_eq!(h.user_row(uuid).unwrap()["core"]["last_login"], serde_json::json!(7));
}

#[test]
fn test_recently_used_entries_survive() {
    let h = Harness::new();
    let uuid = h.seed_user("en-GB", "Alex");

    let report = h.users().evict_idle(Instant::now());
    assert_eq!(report.evicted, 0);
    assert!(h.users().peek(&uuid).is_some());
}
