//! Dirty tracking and flushes.

use std::thread;

use crate::common::*;

#[test]
fn test_ensure_saved_after_many_get_or_new() {
    let h = Harness::new();
    let n = 25u128;
    for k in 0..n {
        h.users().get_or_new(u(k)).wait().unwrap();
    }
    h.users().ensure_saved().wait().unwrap();

    for k in 0..n {
        let row = h.user_row(u(k)).unwrap();
        assert_eq!(row["data_version"], serde_json::json!(UserData::DATA_VERSION));
    }
}

#[test]
fn test_fetch_marks_dirty_and_flush_clears() {
    let h = Harness::new();
    let uuid = h.seed_user("en-GB", "Alex");
    assert!(!h.users().is_dirty(&uuid));

    let user = h.users().get(uuid).wait().unwrap().unwrap();
    assert!(h.users().is_dirty(&uuid));
    user.write().set(&UserData::LAST_LOGIN, 99u64).unwrap();

    assert_eq!(h.users().ensure_saved().wait().unwrap(), 1);
    assert!(!h.users().is_dirty(&uuid));
    assert_eq!(h.user_row(uuid).unwrap()["core"]["last_login"], serde_json::json!(99));
}

#[test]
fn test_concurrent_saves_never_tear() {
    let h = Harness::new();
    let uuid = u(42);
    h.users().get_or_new(uuid).wait().unwrap();
    let handles: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|tag| {
            let users = h.users().clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut data = users.create_new();
                    data.set(&UserData::LOCALE, tag.to_string()).unwrap();
                    data.set(&UserData::LAST_KNOWN_NAME, tag.to_string()).unwrap();
                    users.save(uuid, Record::new(data)).wait().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let row = h.user_row(uuid).unwrap();
    assert_eq!(row["locale"], row["core"]["last_known_name"]);
    let cached = h.users().peek(&uuid).unwrap();
    let locale = cached.read().get(&UserData::LOCALE).unwrap();
    assert_eq!(row["locale"], serde_json::json!(locale));
}

#[test]
fn test_delete_clears_dirty_state() {
    let h = Harness::new();
    let uuid = h.seed_user("en-GB", "Alex");
    h.users().get(uuid).wait().unwrap();
    assert!(h.users().is_dirty(&uuid));

    h.users().delete(uuid).wait().unwrap();
    assert!(!h.users().is_dirty(&uuid));
    assert_eq!(h.users().ensure_saved().wait().unwrap(), 0);
    assert!(h.user_row(uuid).is_none());
}

#[test]
fn test_save_all_covers_every_service() {
    let h = Harness::new();
    let uuid = h.seed_user("en-GB", "Alex");
    let world_key = WorldKey::minecraft("overworld");
    h.manager.get_or_create_world_on_thread(&world_key).unwrap();

    let user = h.users().get(uuid).wait().unwrap().unwrap();
    user.write().set(&UserData::FLYING, true).unwrap();
    let world = h.manager.get_world_on_thread(&world_key).unwrap().unwrap();
    world.write().set(&WorldData::LOCKED, true).unwrap();
    let general = h.manager.general().unwrap();
    general
        .write()
        .set(&GeneralData::WARPS, vec!["spawn".to_string()])
        .unwrap();

    h.manager.save_all().wait().unwrap();

    assert_eq!(h.user_row(uuid).unwrap()["fly"]["flying"], serde_json::json!(true));
    assert_eq!(
        h.factory.worlds().row(&world_key).unwrap()["locked"],
        serde_json::json!(true)
    );
    assert_eq!(
        h.factory.general().stored().unwrap()["warps"],
        serde_json::json!(["spawn"])
    );
}
