//! Caching and locking layer for Keepsake
//!
//! This crate implements the storage façade shared by every entity type:
//! - LockRegistry: per-key read/write locks with idle eviction
//! - TtlCache: DashMap-based idle-TTL cache of domain objects
//! - DirtySet: concurrent set of keys with unpersisted changes
//! - Dispatcher: worker pool that keeps backend I/O off the main thread
//! - StorageFuture: blocking completion handle for dispatched work
//! - KeyedStorageService: cache + locks + dirty tracking over a keyed repository
//! - SingleCachedService: the same for singleton data
//! - IdleSweeper: background idle eviction task
//!
//! # Concurrency
//!
//! There is no global lock. Operations on different keys never block each
//! other; operations on the same key serialize on that key's lock whenever
//! they reach the backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod dirty;
pub mod dispatcher;
pub mod future;
pub mod keyed;
pub mod lock_registry;
pub mod record;
pub mod single;
pub mod sweeper;

pub use cache::TtlCache;
pub use config::{ServiceConfig, DEFAULT_CACHE_TTL};
pub use dirty::DirtySet;
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use future::StorageFuture;
pub use keyed::{EvictionReport, KeyedStorageService, ServiceStats, SharedRepository};
pub use lock_registry::{KeyLock, LockRegistry};
pub use record::Record;
pub use single::{SharedSingleRepository, SingleCachedService};
pub use sweeper::{Evictable, IdleSweeper};
