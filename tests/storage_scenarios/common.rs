//! Shared helpers for the storage scenarios.

#![allow(dead_code)]

use std::sync::{Arc, Once};

pub use keepsake::*;
use uuid::Uuid;

static LOGGING: Once = Once::new();

/// Install the log subscriber once per test binary. `KEEPSAKE_LOG` overrides.
pub fn init_tracing() {
    LOGGING.call_once(|| {
        init_logging("warn");
    });
}

/// A manager plus direct access to its backing rows.
pub struct Harness {
    pub factory: Arc<MemoryRepositoryFactory>,
    pub manager: StorageManager,
}

impl Harness {
    /// Key-only repositories, default config
    pub fn new() -> Self {
        Self::build(MemoryRepositoryFactory::new())
    }

    /// Repositories that also answer filtered queries
    pub fn with_non_key_queries() -> Self {
        Self::build(MemoryRepositoryFactory::with_non_key_queries(true))
    }

    fn build(factory: MemoryRepositoryFactory) -> Self {
        init_tracing();
        let factory = Arc::new(factory);
        let manager = StorageManager::new(KeepsakeConfig::default(), factory.clone())
            .expect("manager starts");
        Self { factory, manager }
    }

    pub fn users(&self) -> &UserService {
        self.manager.user_service()
    }

    /// Stored row for `uuid`, bypassing every cache
    pub fn user_row(&self, uuid: Uuid) -> Option<serde_json::Value> {
        self.factory.users().row(&uuid)
    }

    /// Create a player with the given locale and name, persisted
    pub fn seed_user(&self, locale: &str, name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        let user = self.users().get_or_new_on_thread(&uuid).unwrap();
        {
            let mut data = user.write();
            data.set(&UserData::LOCALE, locale.to_string()).unwrap();
            data.set(&UserData::LAST_KNOWN_NAME, name.to_string()).unwrap();
        }
        self.users().save_on_thread(&uuid, &user).unwrap();
        uuid
    }
}

/// Fixed player id for named scenarios
pub fn u(n: u128) -> Uuid {
    Uuid::from_u128(n)
}
