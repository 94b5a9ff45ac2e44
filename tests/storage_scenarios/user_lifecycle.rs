//! Create, save, read from another thread, delete.

use std::thread;

use crate::common::*;

#[test]
fn test_locale_scenario_across_threads() {
    let h = Harness::new();
    let u1 = u(1);

    let created = h.users().get_or_new(u1).wait().unwrap();
    assert_eq!(
        DataVersioning::<UserData>::version_of(created.read().node()),
        UserData::DATA_VERSION
    );

    created
        .write()
        .set(&UserData::LOCALE, "en-GB".to_string())
        .unwrap();
    h.users().save(u1, created.clone()).wait().unwrap();

    let users = h.users().clone();
    let seen = thread::spawn(move || users.get(u1).wait())
        .join()
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(seen.read().get(&UserData::LOCALE).as_deref(), Some("en-GB"));

    h.users().delete(u1).wait().unwrap();
    assert!(h.users().get(u1).wait().unwrap().is_none());
    assert!(h.user_row(u1).is_none());
}

#[test]
fn test_never_saved_keys_are_absent() {
    let h = Harness::new();
    for n in 100..120 {
        assert!(h.users().get(u(n)).wait().unwrap().is_none());
        assert!(!h.users().exists(u(n)).wait().unwrap());
    }
    assert_eq!(h.users().stats().cached, 0);
}

#[test]
fn test_get_or_new_twice_is_one_object() {
    let h = Harness::new();
    let first = h.users().get_or_new(u(7)).wait().unwrap();
    let second = h.users().get_or_new(u(7)).wait().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(h.factory.users().len(), 1);
}

#[test]
fn test_fresh_reader_sees_saved_value() {
    let h = Harness::new();
    let uuid = h.seed_user("pt-BR", "Ana");

    // Drop the cache so the read goes to the backend
    h.users().clear_cache().wait().unwrap();
    let loaded = h.users().get(uuid).wait().unwrap().unwrap();
    assert_eq!(loaded.read().get(&UserData::LOCALE).as_deref(), Some("pt-BR"));
    assert_eq!(
        loaded.read().get(&UserData::LAST_KNOWN_NAME).as_deref(),
        Some("Ana")
    );
}

#[test]
fn test_set_and_remove_and_save() {
    let h = Harness::new();
    let uuid = h.seed_user("en-US", "Sam");

    h.users()
        .set_and_save(uuid, UserData::FLYING, true)
        .wait()
        .unwrap();
    assert_eq!(h.user_row(uuid).unwrap()["fly"]["flying"], serde_json::json!(true));

    h.users()
        .remove_and_save(uuid, UserData::LOCALE)
        .wait()
        .unwrap();
    assert!(h.user_row(uuid).unwrap().get("locale").is_none());
}

#[test]
fn test_offloaded_calls_from_main_thread() {
    let h = Harness::new();
    h.manager.designate_main_thread(thread::current().id());

    let user = h.manager.get_or_create_user(u(3)).wait().unwrap();
    user.write()
        .set(&UserData::LOCALE, "sv-SE".to_string())
        .unwrap();
    h.manager.save_user(u(3), user).wait().unwrap();

    assert!(h.manager.dispatcher().stats().offloaded >= 2);
    assert_eq!(h.user_row(u(3)).unwrap()["locale"], serde_json::json!("sv-SE"));
}
