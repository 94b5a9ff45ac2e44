//! Storage manager
//!
//! The [`StorageManager`] owns the dispatcher, the built-in services for
//! players, worlds and server-wide data, the idle sweeper and every
//! registered [`StorageModule`]. It is the one place that saves, clears or
//! swaps backends for all of them at once.
//!
//! Failures during the bulk operations never stop the walk: every service is
//! visited, each failure is logged, and the first error is returned.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use dashmap::DashMap;
use keepsake_core::{Error, JsonTranslator, KeepsakeResult};
use keepsake_storage::{
    Dispatcher, Evictable, IdleSweeper, KeyedStorageService, Record, SharedRepository,
    SharedSingleRepository, SingleCachedService, StorageFuture,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::KeepsakeConfig;
use crate::data::{GeneralData, UserData, UserQuery, WorldData, WorldKey, WorldQuery};
use crate::memory::{MemoryKeyedRepository, MemorySingleRepository};
use crate::module::StorageModule;
use crate::versioning::DataVersioning;

/// Player storage
pub type UserService = KeyedStorageService<Uuid, UserQuery, UserData, Value>;
/// World storage
pub type WorldService = KeyedStorageService<WorldKey, WorldQuery, WorldData, Value>;
/// Server-wide storage
pub type GeneralService = SingleCachedService<GeneralData, Value>;

// ============================================================================
// Repository factory
// ============================================================================

/// Source of repositories for the built-in services and modules.
///
/// Called once at construction and again on every [`StorageManager::attach_all`].
pub trait RepositoryFactory: Send + Sync {
    /// Repository for player data
    fn user_repository(&self) -> SharedRepository<Uuid, UserQuery, Value>;

    /// Repository for world data
    fn world_repository(&self) -> SharedRepository<WorldKey, WorldQuery, Value>;

    /// Repository for server-wide data
    fn general_repository(&self) -> SharedSingleRepository<Value>;

    /// Named single-document repository for a module
    fn single_repository(&self, name: &str) -> SharedSingleRepository<Value>;
}

/// Factory handing out in-memory repositories.
///
/// The same repositories are returned on every call, so stored data survives
/// a detach and re-attach.
pub struct MemoryRepositoryFactory {
    users: Arc<MemoryKeyedRepository<Uuid, UserQuery>>,
    worlds: Arc<MemoryKeyedRepository<WorldKey, WorldQuery>>,
    general: Arc<MemorySingleRepository>,
    singles: DashMap<String, Arc<MemorySingleRepository>>,
}

impl MemoryRepositoryFactory {
    /// A factory whose keyed repositories answer key queries only
    pub fn new() -> Self {
        Self::with_non_key_queries(false)
    }

    /// A factory whose keyed repositories also answer unrestricted queries
    pub fn with_non_key_queries(enabled: bool) -> Self {
        Self {
            users: Arc::new(MemoryKeyedRepository::with_non_key_queries(enabled)),
            worlds: Arc::new(MemoryKeyedRepository::with_non_key_queries(enabled)),
            general: Arc::new(MemorySingleRepository::new()),
            singles: DashMap::new(),
        }
    }

    /// Player rows
    pub fn users(&self) -> &Arc<MemoryKeyedRepository<Uuid, UserQuery>> {
        &self.users
    }

    /// World rows
    pub fn worlds(&self) -> &Arc<MemoryKeyedRepository<WorldKey, WorldQuery>> {
        &self.worlds
    }

    /// Server-wide document
    pub fn general(&self) -> &Arc<MemorySingleRepository> {
        &self.general
    }

    /// Named module document, created empty on first use
    pub fn single(&self, name: &str) -> Arc<MemorySingleRepository> {
        Arc::clone(
            self.singles
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemorySingleRepository::new()))
                .value(),
        )
    }
}

impl Default for MemoryRepositoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryFactory for MemoryRepositoryFactory {
    fn user_repository(&self) -> SharedRepository<Uuid, UserQuery, Value> {
        self.users.clone()
    }

    fn world_repository(&self) -> SharedRepository<WorldKey, WorldQuery, Value> {
        self.worlds.clone()
    }

    fn general_repository(&self) -> SharedSingleRepository<Value> {
        self.general.clone()
    }

    fn single_repository(&self, name: &str) -> SharedSingleRepository<Value> {
        self.single(name)
    }
}

// ============================================================================
// Manager
// ============================================================================

struct ModuleEntry {
    type_id: TypeId,
    module: Arc<dyn StorageModule>,
    any: Arc<dyn Any + Send + Sync>,
}

struct Shared {
    dispatcher: Arc<Dispatcher>,
    factory: Arc<dyn RepositoryFactory>,
    users: UserService,
    worlds: WorldService,
    general: GeneralService,
    modules: RwLock<Vec<ModuleEntry>>,
}

/// Owner of every storage service.
///
/// # Example
///
/// ```ignore
/// let factory = Arc::new(MemoryRepositoryFactory::new());
/// let manager = StorageManager::new(KeepsakeConfig::default(), factory)?;
/// let user = manager.get_or_create_user_on_thread(uuid)?;
/// user.write().set(&UserData::LOCALE, "en-GB".into())?;
/// manager.save_user(uuid, user).wait()?;
/// manager.shutdown();
/// ```
pub struct StorageManager {
    config: KeepsakeConfig,
    shared: Arc<Shared>,
    sweeper: IdleSweeper,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StorageManager {
    /// Build the dispatcher and built-in services over `factory`'s
    /// repositories, start them, and start the idle sweeper.
    pub fn new(config: KeepsakeConfig, factory: Arc<dyn RepositoryFactory>) -> KeepsakeResult<Self> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(
            config.worker_threads,
            config.max_queue_depth,
        )?);
        let service_config = config.service_config();

        let users = UserService::new(
            "users",
            factory.user_repository(),
            Arc::new(JsonTranslator::<UserData>::new()),
            Arc::new(UserData::versioning()),
            Arc::clone(&dispatcher),
            service_config.clone(),
        );
        let worlds = WorldService::new(
            "worlds",
            factory.world_repository(),
            Arc::new(JsonTranslator::<WorldData>::new()),
            Arc::new(DataVersioning::<WorldData>::new(1)),
            Arc::clone(&dispatcher),
            service_config,
        );
        let general = GeneralService::new(
            "general",
            factory.general_repository(),
            Arc::new(JsonTranslator::<GeneralData>::new()),
            Arc::new(DataVersioning::<GeneralData>::new(1)),
            Arc::clone(&dispatcher),
        );

        let shared = Arc::new(Shared {
            dispatcher,
            factory,
            users,
            worlds,
            general,
            modules: RwLock::new(Vec::new()),
        });
        shared.attach_builtins()?;

        let sweeper = IdleSweeper::new(
            vec![
                Arc::new(shared.users.clone()) as Arc<dyn Evictable>,
                Arc::new(shared.worlds.clone()),
            ],
            config.sweep_interval(),
        );
        let handle = sweeper.start()?;

        info!(
            target: "keepsake::manager",
            workers = config.worker_threads,
            cache_ttl_secs = config.cache_ttl_secs,
            "Storage manager started"
        );

        Ok(Self {
            config,
            shared,
            sweeper,
            sweeper_handle: Mutex::new(Some(handle)),
        })
    }

    /// Build over in-memory repositories
    pub fn in_memory(config: KeepsakeConfig) -> KeepsakeResult<Self> {
        Self::new(config, Arc::new(MemoryRepositoryFactory::new()))
    }

    /// Configuration the manager was built with
    pub fn config(&self) -> &KeepsakeConfig {
        &self.config
    }

    /// The shared dispatcher
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// Mark `thread` as the server main thread. Calls made from it are
    /// offloaded to the worker pool.
    pub fn designate_main_thread(&self, thread: ThreadId) {
        self.shared.dispatcher.designate_main_thread(thread);
    }

    /// Player service
    pub fn user_service(&self) -> &UserService {
        &self.shared.users
    }

    /// World service
    pub fn world_service(&self) -> &WorldService {
        &self.shared.worlds
    }

    /// Server-wide service
    pub fn general_service(&self) -> &GeneralService {
        &self.shared.general
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Register `module`, attaching it to the current factory.
    ///
    /// Fails with [`Error::InvalidOperation`] if a module of the same type is
    /// already registered.
    pub fn register<M: StorageModule>(&self, module: M) -> KeepsakeResult<Arc<M>> {
        let type_id = TypeId::of::<M>();
        let mut modules = self.shared.modules.write();
        if modules.iter().any(|entry| entry.type_id == type_id) {
            return Err(Error::InvalidOperation(format!(
                "storage module {} is already registered",
                module.name()
            )));
        }
        module.attach(self.shared.factory.as_ref())?;
        let module = Arc::new(module);
        info!(target: "keepsake::manager", module = module.name(), "Storage module registered");
        modules.push(ModuleEntry {
            type_id,
            module: module.clone(),
            any: module.clone(),
        });
        Ok(module)
    }

    /// The registered module of type `M`
    pub fn module<M: StorageModule>(&self) -> Option<Arc<M>> {
        let type_id = TypeId::of::<M>();
        let modules = self.shared.modules.read();
        let entry = modules.iter().find(|entry| entry.type_id == type_id)?;
        Arc::clone(&entry.any).downcast::<M>().ok()
    }

    /// Number of registered modules
    pub fn module_count(&self) -> usize {
        self.shared.modules.read().len()
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Flush every service and module.
    pub fn save_all(&self) -> StorageFuture<()> {
        let shared = Arc::clone(&self.shared);
        self.shared.dispatcher.run(move || shared.save_all())
    }

    /// Blocking form of [`save_all`](Self::save_all)
    pub fn save_all_on_thread(&self) -> KeepsakeResult<()> {
        self.shared.save_all()
    }

    /// Flush every service and module, then drop all cached state.
    ///
    /// Caches are cleared even where the flush failed.
    pub fn save_and_invalidate_all_caches(&self) -> StorageFuture<()> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .dispatcher
            .run(move || shared.save_and_invalidate())
    }

    /// Blocking form of [`save_and_invalidate_all_caches`](Self::save_and_invalidate_all_caches)
    pub fn save_and_invalidate_all_caches_on_thread(&self) -> KeepsakeResult<()> {
        self.shared.save_and_invalidate()
    }

    /// Detach everything, then attach fresh repositories from the factory.
    pub fn attach_all(&self) -> KeepsakeResult<()> {
        let detached = self.shared.detach_all();
        let attached = self.shared.attach_all();
        detached.and(attached)
    }

    /// Flush and detach every service and module. Calls made afterwards fail
    /// with [`Error::Detached`] until [`attach_all`](Self::attach_all).
    pub fn detach_all(&self) -> KeepsakeResult<()> {
        self.shared.detach_all()
    }

    // ========================================================================
    // Convenience accessors
    // ========================================================================

    /// Player data for `uuid`, created and persisted if absent
    pub fn get_or_create_user(&self, uuid: Uuid) -> StorageFuture<Record<UserData>> {
        self.shared.users.get_or_new(uuid)
    }

    /// Blocking form of [`get_or_create_user`](Self::get_or_create_user)
    pub fn get_or_create_user_on_thread(&self, uuid: Uuid) -> KeepsakeResult<Record<UserData>> {
        self.shared.users.get_or_new_on_thread(&uuid)
    }

    /// Player data for `uuid`, if stored
    pub fn get_user(&self, uuid: Uuid) -> StorageFuture<Option<Record<UserData>>> {
        self.shared.users.get(uuid)
    }

    /// Blocking form of [`get_user`](Self::get_user)
    pub fn get_user_on_thread(&self, uuid: Uuid) -> KeepsakeResult<Option<Record<UserData>>> {
        self.shared.users.get_on_thread(&uuid)
    }

    /// Persist player data
    pub fn save_user(&self, uuid: Uuid, record: Record<UserData>) -> StorageFuture<()> {
        self.shared.users.save(uuid, record)
    }

    /// World data for `key`, if stored
    pub fn get_world_on_thread(&self, key: &WorldKey) -> KeepsakeResult<Option<Record<WorldData>>> {
        self.shared.worlds.get_on_thread(key)
    }

    /// World data for `key`, created and persisted if absent
    pub fn get_or_create_world_on_thread(&self, key: &WorldKey) -> KeepsakeResult<Record<WorldData>> {
        self.shared.worlds.get_or_new_on_thread(key)
    }

    /// The server-wide document, loading or creating it as needed
    pub fn general(&self) -> KeepsakeResult<Record<GeneralData>> {
        match self.shared.general.cached() {
            Some(record) => Ok(record),
            None => self.shared.general.get_or_new_on_thread(),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Flush everything, then stop the sweeper and the dispatcher.
    ///
    /// Idempotent. The flush result is returned; background work stops
    /// regardless.
    pub fn shutdown(&self) -> KeepsakeResult<()> {
        if self.sweeper.is_shutdown() {
            return Ok(());
        }
        let flushed = self.shared.save_all();
        self.stop_background();
        info!(target: "keepsake::manager", clean = flushed.is_ok(), "Storage manager stopped");
        flushed
    }

    fn stop_background(&self) {
        self.sweeper.shutdown();
        if let Some(handle) = self.sweeper_handle.lock().take() {
            if handle.join().is_err() {
                warn!(target: "keepsake::manager", "Sweeper thread panicked");
            }
        }
        self.shared.dispatcher.shutdown();
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.stop_background();
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("users", &self.shared.users)
            .field("worlds", &self.shared.worlds)
            .field("general", &self.shared.general)
            .field("modules", &self.module_count())
            .finish()
    }
}

/// Keep the first error, log every one.
fn record_failure(first: &mut Option<Error>, what: &str, action: &str, result: KeepsakeResult<()>) {
    if let Err(e) = result {
        warn!(target: "keepsake::manager", service = what, action, error = %e, "Storage operation failed");
        if first.is_none() {
            *first = Some(e);
        }
    }
}

fn into_result(first: Option<Error>) -> KeepsakeResult<()> {
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl Shared {
    fn modules(&self) -> Vec<Arc<dyn StorageModule>> {
        self.modules
            .read()
            .iter()
            .map(|entry| Arc::clone(&entry.module))
            .collect()
    }

    fn attach_builtins(&self) -> KeepsakeResult<()> {
        let mut first = None;
        record_failure(&mut first, "users", "attach", self.users.attach(self.factory.user_repository()));
        record_failure(&mut first, "worlds", "attach", self.worlds.attach(self.factory.world_repository()));
        record_failure(
            &mut first,
            "general",
            "attach",
            self.general.attach(self.factory.general_repository()),
        );
        into_result(first)
    }

    fn save_all(&self) -> KeepsakeResult<()> {
        let mut first = None;
        record_failure(&mut first, "general", "save", self.general.ensure_saved_on_thread());
        record_failure(&mut first, "users", "save", self.users.ensure_saved_on_thread().map(|_| ()));
        record_failure(&mut first, "worlds", "save", self.worlds.ensure_saved_on_thread().map(|_| ()));
        for module in self.modules() {
            record_failure(&mut first, module.name(), "save", module.ensure_saved());
        }
        into_result(first)
    }

    fn save_and_invalidate(&self) -> KeepsakeResult<()> {
        let saved = self.save_all();
        let mut first = None;
        self.general.clear_cache();
        record_failure(&mut first, "users", "clear", self.users.clear_cache().wait());
        record_failure(&mut first, "worlds", "clear", self.worlds.clear_cache().wait());
        for module in self.modules() {
            module.clear_cache();
        }
        saved.and(into_result(first))
    }

    fn attach_all(&self) -> KeepsakeResult<()> {
        let mut first = self.attach_builtins().err();
        for module in self.modules() {
            record_failure(&mut first, module.name(), "attach", module.attach(self.factory.as_ref()));
        }
        into_result(first)
    }

    fn detach_all(&self) -> KeepsakeResult<()> {
        let mut first = None;
        record_failure(&mut first, "general", "detach", self.general.detach());
        record_failure(&mut first, "users", "detach", self.users.detach());
        record_failure(&mut first, "worlds", "detach", self.worlds.detach());
        for module in self.modules() {
            record_failure(&mut first, module.name(), "detach", module.detach());
        }
        into_result(first)
    }
}
