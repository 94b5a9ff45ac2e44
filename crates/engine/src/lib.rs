//! Storage orchestration for keepsake
//!
//! This crate wires the storage services to concrete entities:
//! - Built-in entities: players, worlds, server-wide data and kits
//! - Data versioning for stored JSON trees
//! - In-memory reference repositories
//! - The storage manager and pluggable storage modules
//! - File configuration and log setup
//!
//! The manager is the only component that knows about every service at once.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod manager;
pub mod memory;
pub mod module;
pub mod telemetry;
pub mod versioning;

pub use config::{KeepsakeConfig, CONFIG_FILE_NAME};
pub use data::{
    GeneralData, Kit, KitData, Position, UserData, UserQuery, WorldData, WorldKey, WorldQuery,
};
pub use manager::{
    GeneralService, MemoryRepositoryFactory, RepositoryFactory, StorageManager, UserService,
    WorldService,
};
pub use memory::{JsonFilter, MemoryKeyedRepository, MemorySingleRepository};
pub use module::{KitStorageModule, StorageModule};
pub use telemetry::{init_logging, LOG_ENV_VAR};
pub use versioning::{DataVersioning, UpgradeStep, DATA_VERSION_PATH, UNVERSIONED};
