//! Core types and traits for Keepsake
//!
//! This crate defines the contracts shared by the storage layer and the
//! entities built on it:
//! - Error: error taxonomy and result alias
//! - DataKey: typed field tokens
//! - JsonDataObject / KeyedDataObject: field containers for stored entities
//! - QueryObject / KeyQuery: declarative filters
//! - KeyedObject: result of a unique-match query
//! - DataTranslator: domain object <-> stored object mapping
//! - KeyedRepository / SingleRepository: backend contracts
//! - Migration: version stamp and upgrade hooks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data_key;
pub mod data_object;
pub mod error;
pub mod keyed_object;
pub mod migration;
pub mod query;
pub mod repository;
pub mod translator;

pub use data_key::DataKey;
pub use data_object::{JsonBacked, JsonDataObject, KeyedDataObject, ValueGuard};
pub use error::{Error, KeepsakeResult};
pub use keyed_object::KeyedObject;
pub use migration::{Migration, NoMigration};
pub use query::{ensure_supported, KeyQuery, QueryObject};
pub use repository::{KeyedRepository, SingleRepository};
pub use translator::{DataTranslator, JsonTranslator};
