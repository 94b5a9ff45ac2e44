//! Integration tests for the storage manager
//!
//! Tests for:
//! - Player and world round trips through the built-in services
//! - Bulk save, invalidate, detach and attach
//! - Module registration and lookup
//! - Main-thread offloading
//! - Loading from a config file

use std::sync::Arc;

use keepsake_core::{Error, KeyedDataObject};
use keepsake_engine::{
    DataVersioning, GeneralData, Kit, KitStorageModule, KeepsakeConfig, MemoryRepositoryFactory,
    Position, StorageManager, StorageModule, UserData, UserQuery, WorldData, WorldKey,
};
use keepsake_storage::Record;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

fn manager_with(factory: &Arc<MemoryRepositoryFactory>) -> StorageManager {
    StorageManager::new(KeepsakeConfig::default(), factory.clone()).unwrap()
}

/// Create the player, then fetch it again. Creation leaves the entry clean;
/// the second fetch marks it dirty, as any fetch before an edit does.
fn editable_user(manager: &StorageManager, uuid: Uuid) -> Record<UserData> {
    manager.get_or_create_user_on_thread(uuid).unwrap();
    manager.get_user_on_thread(uuid).unwrap().unwrap()
}

// ============================================================================
// Built-in services
// ============================================================================

#[test]
fn test_user_round_trip() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let uuid = Uuid::new_v4();

    let user = manager.get_or_create_user_on_thread(uuid).unwrap();
    user.write().set(&UserData::LOCALE, "en-GB".to_string()).unwrap();
    manager.save_user(uuid, user.clone()).wait().unwrap();

    let row = factory.users().row(&uuid).unwrap();
    assert_eq!(row["locale"], json!("en-GB"));
    assert_eq!(row["data_version"], json!(UserData::DATA_VERSION));

    let again = manager.get_user_on_thread(uuid).unwrap().unwrap();
    assert!(again.ptr_eq(&user));
}

#[test]
fn test_missing_user_is_none() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    assert!(manager.get_user(Uuid::new_v4()).wait().unwrap().is_none());
    assert!(factory.users().is_empty());
}

#[test]
fn test_new_user_is_persisted_immediately() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let uuid = Uuid::new_v4();

    manager.get_or_create_user(uuid).wait().unwrap();
    assert_eq!(factory.users().len(), 1);
    assert!(factory.users().row(&uuid).is_some());
}

#[test]
fn test_legacy_user_rows_are_upgraded_on_load() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let uuid = Uuid::new_v4();
    {
        use keepsake_core::KeyedRepository;
        factory
            .users()
            .save(&uuid, json!({"core": {"locale": "de-DE", "last_known_name": "Alex"}}))
            .unwrap();
    }
    let manager = manager_with(&factory);

    let user = manager.get_user_on_thread(uuid).unwrap().unwrap();
    assert_eq!(user.read().get(&UserData::LOCALE).as_deref(), Some("de-DE"));

    // Upgraded shape reaches the backend on the next flush
    manager.save_all_on_thread().unwrap();
    let row = factory.users().row(&uuid).unwrap();
    assert_eq!(row["locale"], json!("de-DE"));
    assert_eq!(row["data_version"], json!(UserData::DATA_VERSION));
    assert!(row["core"].get("locale").is_none());
}

#[test]
fn test_world_round_trip() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let nether = WorldKey::minecraft("the_nether");

    assert!(manager.get_world_on_thread(&nether).unwrap().is_none());
    manager.get_or_create_world_on_thread(&nether).unwrap();
    let world = manager.get_world_on_thread(&nether).unwrap().unwrap();
    world
        .write()
        .set(&WorldData::SPAWN, Position::new("minecraft:the_nether", 8.0, 33.0, 8.0))
        .unwrap();
    manager.save_all().wait().unwrap();

    let row = factory.worlds().row(&nether).unwrap();
    assert_eq!(row["spawn"]["position"]["y"], json!(33.0));
}

#[test]
fn test_general_document() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);

    let general = manager.general().unwrap();
    general
        .write()
        .set(&GeneralData::FIRST_JOIN_KITS, vec!["starter".to_string()])
        .unwrap();
    assert!(manager.general().unwrap().ptr_eq(&general));

    manager.save_all_on_thread().unwrap();
    let stored = factory.general().stored().unwrap();
    assert_eq!(stored["kits"]["first_join"], json!(["starter"]));
}

#[test]
fn test_non_key_user_query_needs_support() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);

    let err = manager
        .user_service()
        .get_all(UserQuery::all().with_locale("en-GB"))
        .wait()
        .unwrap_err();
    assert!(err.is_unsupported_query());
}

#[test]
fn test_locale_query_with_support() {
    let factory = Arc::new(MemoryRepositoryFactory::with_non_key_queries(true));
    let manager = manager_with(&factory);

    for locale in ["en-GB", "fr-FR", "en-GB"] {
        let uuid = Uuid::new_v4();
        let user = manager.get_or_create_user_on_thread(uuid).unwrap();
        user.write().set(&UserData::LOCALE, locale.to_string()).unwrap();
        manager.save_user(uuid, user).wait().unwrap();
    }

    let british = manager
        .user_service()
        .count(UserQuery::all().with_locale("en-GB"))
        .wait()
        .unwrap();
    assert_eq!(british, 2);
}

// ============================================================================
// Bulk operations
// ============================================================================

#[test]
fn test_save_all_flushes_unsaved_edits() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let uuid = Uuid::new_v4();

    let user = editable_user(&manager, uuid);
    user.write().set(&UserData::LAST_LOGIN, 1_700_000_000u64).unwrap();
    assert!(factory.users().row(&uuid).unwrap().get("core").is_none());

    manager.save_all().wait().unwrap();
    let row = factory.users().row(&uuid).unwrap();
    assert_eq!(row["core"]["last_login"], json!(1_700_000_000u64));
}

#[test]
fn test_save_and_invalidate_drops_caches() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let uuid = Uuid::new_v4();

    let user = editable_user(&manager, uuid);
    user.write().set(&UserData::FLYING, true).unwrap();
    manager.general().unwrap();

    manager.save_and_invalidate_all_caches().wait().unwrap();

    assert!(manager.user_service().peek(&uuid).is_none());
    assert!(manager.general_service().cached().is_none());
    assert_eq!(manager.user_service().stats().dirty, 0);

    let reloaded = manager.get_user_on_thread(uuid).unwrap().unwrap();
    assert!(!reloaded.ptr_eq(&user));
    assert_eq!(reloaded.read().get(&UserData::FLYING), Some(true));
}

#[test]
fn test_detach_then_attach_keeps_data() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let uuid = Uuid::new_v4();

    let user = editable_user(&manager, uuid);
    user.write().set(&UserData::LOCALE, "nl-NL".to_string()).unwrap();

    manager.detach_all().unwrap();
    assert!(!factory.users().is_running());
    assert!(matches!(
        manager.get_user_on_thread(uuid),
        Err(Error::Detached(_))
    ));

    manager.attach_all().unwrap();
    assert!(factory.users().is_running());
    let user = manager.get_user_on_thread(uuid).unwrap().unwrap();
    assert_eq!(user.read().get(&UserData::LOCALE).as_deref(), Some("nl-NL"));
}

#[test]
fn test_attach_all_while_attached() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let uuid = Uuid::new_v4();

    let user = editable_user(&manager, uuid);
    user.write().set(&UserData::FLYING, true).unwrap();

    // Pending edits are flushed by the implicit detach
    manager.attach_all().unwrap();
    assert_eq!(factory.users().row(&uuid).unwrap()["fly"]["flying"], json!(true));
    assert!(manager.user_service().peek(&uuid).is_none());
}

// ============================================================================
// Modules
// ============================================================================

#[test]
fn test_register_and_lookup_module() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);

    assert!(manager.module::<KitStorageModule>().is_none());
    let kits = manager
        .register(KitStorageModule::new(factory.as_ref(), manager.dispatcher().clone()))
        .unwrap();
    assert_eq!(kits.name(), "kits");

    let found = manager.module::<KitStorageModule>().unwrap();
    assert!(Arc::ptr_eq(&found, &kits));
    assert_eq!(manager.module_count(), 1);
}

#[test]
fn test_duplicate_module_rejected() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let dispatcher = manager.dispatcher().clone();

    manager
        .register(KitStorageModule::new(factory.as_ref(), dispatcher.clone()))
        .unwrap();
    let err = manager
        .register(KitStorageModule::new(factory.as_ref(), dispatcher))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(manager.module_count(), 1);
}

#[test]
fn test_module_takes_part_in_save_all() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let kits = manager
        .register(KitStorageModule::new(factory.as_ref(), manager.dispatcher().clone()))
        .unwrap();

    let doc = kits.kits().wait().unwrap();
    doc.write()
        .set_kit(
            "starter",
            Kit {
                items: vec!["minecraft:wooden_sword".into()],
                cooldown_secs: None,
                one_time: true,
            },
        )
        .unwrap();

    manager.save_all_on_thread().unwrap();
    let stored = factory.single(KitStorageModule::REPOSITORY).stored().unwrap();
    assert_eq!(stored["kits"]["starter"]["one_time"], json!(true));

    manager.save_and_invalidate_all_caches_on_thread().unwrap();
    assert!(kits.service().cached().is_none());
    let reloaded = kits.kits_on_thread().unwrap();
    assert!(reloaded.read().kit("starter").unwrap().one_time);
}

// ============================================================================
// Threading and lifecycle
// ============================================================================

#[test]
fn test_main_thread_calls_are_offloaded() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    manager.designate_main_thread(std::thread::current().id());

    let uuid = Uuid::new_v4();
    manager.get_or_create_user(uuid).wait().unwrap();
    manager.save_all().wait().unwrap();

    let stats = manager.dispatcher().stats();
    assert!(stats.offloaded >= 2);
    assert!(factory.users().row(&uuid).is_some());
}

#[test]
fn test_shutdown_is_idempotent() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let uuid = Uuid::new_v4();
    let user = editable_user(&manager, uuid);
    user.write().set(&UserData::FIRST_JOIN, 42u64).unwrap();

    manager.shutdown().unwrap();
    manager.shutdown().unwrap();

    assert!(manager.dispatcher().is_shutdown());
    assert_eq!(factory.users().row(&uuid).unwrap()["core"]["first_join"], json!(42));
}

#[test]
fn test_manager_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(keepsake_engine::CONFIG_FILE_NAME);
    std::fs::write(&path, "cache_ttl_secs = 30\nworker_threads = 1\n").unwrap();

    let config = KeepsakeConfig::load_or_create(&path).unwrap();
    assert_eq!(config.cache_ttl_secs, 30);
    let manager = StorageManager::in_memory(config).unwrap();
    assert_eq!(manager.dispatcher().stats().worker_count, 1);
    assert_eq!(manager.config().cache_ttl_secs, 30);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = KeepsakeConfig {
        worker_threads: 0,
        ..KeepsakeConfig::default()
    };
    let err = StorageManager::in_memory(config).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_world_versioning_is_stamped() {
    let factory = Arc::new(MemoryRepositoryFactory::new());
    let manager = manager_with(&factory);
    let key = WorldKey::minecraft("overworld");
    manager.get_or_create_world_on_thread(&key).unwrap();

    let row = factory.worlds().row(&key).unwrap();
    let node = keepsake_core::JsonDataObject::from_value(row).unwrap();
    assert_eq!(DataVersioning::<WorldData>::version_of(&node), 1);
}
