//! Keepsake - keyed-entity storage and caching for game server plugins
//!
//! Keepsake keeps per-player, per-world and server-wide data in memory,
//! serializes backend access per key, and flushes changes to a pluggable
//! repository.
//!
//! # Quick Start
//!
//! ```ignore
//! use keepsake::{KeepsakeConfig, KeyedDataObject, StorageManager, UserData};
//!
//! let manager = StorageManager::in_memory(KeepsakeConfig::default())?;
//! manager.designate_main_thread(std::thread::current().id());
//!
//! let user = manager.get_or_create_user(uuid).wait()?;
//! user.write().set(&UserData::LOCALE, "en-GB".to_string())?;
//! manager.save_user(uuid, user).wait()?;
//! ```
//!
//! # Architecture
//!
//! - `keepsake-core`: contracts for data keys, translators, repositories and queries
//! - `keepsake-storage`: per-key locks, TTL cache, dirty tracking, dispatcher, cached services
//! - `keepsake-engine`: built-in entities, the storage manager and modules, config and logging
//!
//! Everything a consumer needs is re-exported here.

pub use keepsake_core::{
    DataKey, DataTranslator, Error, JsonBacked, JsonDataObject, JsonTranslator, KeepsakeResult,
    KeyQuery, KeyedDataObject, KeyedObject, KeyedRepository, Migration, NoMigration, QueryObject,
    SingleRepository, ValueGuard,
};
pub use keepsake_engine::*;
pub use keepsake_storage::{
    Dispatcher, DispatcherStats, EvictionReport, KeyedStorageService, Record, ServiceConfig,
    ServiceStats, SharedRepository, SharedSingleRepository, SingleCachedService, StorageFuture,
    DEFAULT_CACHE_TTL,
};
