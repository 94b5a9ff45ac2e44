//! Pluggable storage modules
//!
//! Features that own their own persisted data register a [`StorageModule`]
//! with the [`StorageManager`](crate::StorageManager). The manager drives
//! each module through the same save, clear and attach cycle as the built-in
//! services.

use std::sync::Arc;

use keepsake_core::{JsonTranslator, KeepsakeResult};
use keepsake_storage::{Dispatcher, Record, SingleCachedService, StorageFuture};
use serde_json::Value;

use crate::data::KitData;
use crate::manager::RepositoryFactory;
use crate::versioning::DataVersioning;

/// A feature-owned storage unit managed alongside the built-in services.
pub trait StorageModule: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Write every unsaved change to the backend
    fn ensure_saved(&self) -> KeepsakeResult<()>;

    /// Drop cached state. Unsaved changes are discarded.
    fn clear_cache(&self);

    /// Swap in repositories from `factory`
    fn attach(&self, factory: &dyn RepositoryFactory) -> KeepsakeResult<()>;

    /// Flush, then release the current repositories
    fn detach(&self) -> KeepsakeResult<()>;
}

/// Storage for server kits, a single document under the `kits` repository.
#[derive(Debug, Clone)]
pub struct KitStorageModule {
    service: SingleCachedService<KitData, Value>,
}

impl KitStorageModule {
    /// Repository name requested from the factory
    pub const REPOSITORY: &'static str = "kits";

    /// Build the module over the factory's kits repository
    pub fn new(factory: &dyn RepositoryFactory, dispatcher: Arc<Dispatcher>) -> Self {
        let service = SingleCachedService::new(
            Self::REPOSITORY,
            factory.single_repository(Self::REPOSITORY),
            Arc::new(JsonTranslator::<KitData>::new()),
            Arc::new(DataVersioning::<KitData>::new(1)),
            dispatcher,
        );
        Self { service }
    }

    /// The underlying cached service
    pub fn service(&self) -> &SingleCachedService<KitData, Value> {
        &self.service
    }

    /// The kits document, loading or creating it as needed
    pub fn kits(&self) -> StorageFuture<Record<KitData>> {
        match self.service.cached() {
            Some(record) => StorageFuture::ready(Ok(record)),
            None => self.service.get_or_new(),
        }
    }

    /// Blocking form of [`kits`](Self::kits)
    pub fn kits_on_thread(&self) -> KeepsakeResult<Record<KitData>> {
        match self.service.cached() {
            Some(record) => Ok(record),
            None => self.service.get_or_new_on_thread(),
        }
    }

    /// Persist the cached kits document
    pub fn save(&self) -> StorageFuture<()> {
        self.service.ensure_saved()
    }
}

impl StorageModule for KitStorageModule {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn ensure_saved(&self) -> KeepsakeResult<()> {
        self.service.ensure_saved_on_thread()
    }

    fn clear_cache(&self) {
        self.service.clear_cache();
    }

    fn attach(&self, factory: &dyn RepositoryFactory) -> KeepsakeResult<()> {
        self.service
            .attach(factory.single_repository(Self::REPOSITORY))
    }

    fn detach(&self) -> KeepsakeResult<()> {
        self.service.detach()
    }
}
