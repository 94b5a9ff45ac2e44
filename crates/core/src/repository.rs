//! Backend contracts
//!
//! A repository persists stored objects (`O`) and knows nothing about domain
//! objects, caching or locking. Implementations must be safe to call from
//! multiple threads at once.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::KeepsakeResult;
use crate::keyed_object::KeyedObject;
use crate::query::QueryObject;

/// Backend keyed by a primary key `K`, queried with `Q`.
///
/// A query that is not restricted to explicit keys, issued against a
/// repository whose [`supports_non_key_queries`](Self::supports_non_key_queries)
/// is `false`, must fail with `Error::UnsupportedQuery` rather than return an
/// empty or partial result.
pub trait KeyedRepository<K, Q, O>: Send + Sync
where
    K: Eq + Hash,
    Q: QueryObject<K>,
{
    /// Load the object stored under `key`
    fn get(&self, key: &K) -> KeepsakeResult<Option<O>>;

    /// Load every object matching `query`. No match is an empty map.
    fn get_all(&self, query: &Q) -> KeepsakeResult<HashMap<K, O>>;

    /// Load the single object identified by `query`, if one can be
    /// identified.
    fn get_unique(&self, query: &Q) -> KeepsakeResult<Option<KeyedObject<K, O>>>;

    /// True if an object is stored under `key`
    fn exists(&self, key: &K) -> KeepsakeResult<bool>;

    /// Number of objects matching `query`
    fn count(&self, query: &Q) -> KeepsakeResult<usize>;

    /// Persist `object` under `key`, replacing any previous object
    fn save(&self, key: &K, object: O) -> KeepsakeResult<()>;

    /// Remove the object stored under `key`
    fn delete(&self, key: &K) -> KeepsakeResult<()>;

    /// Whether queries other than explicit key sets are supported
    fn supports_non_key_queries(&self) -> bool {
        false
    }

    /// Every key the backend holds
    fn all_keys(&self) -> KeepsakeResult<Vec<K>>;

    /// Prepare the backend for use. Returns `false` if it cannot be used.
    fn startup(&self) -> bool {
        true
    }

    /// Release backend resources
    fn shutdown(&self) {}

    /// Whether the backend keeps its own cache
    fn has_cache(&self) -> bool {
        false
    }

    /// Drop the backend's own cache, if it has one
    fn clear_cache(&self) {}

    /// Drop the backend's own cache entries for `keys`
    fn clear_cache_for(&self, _keys: &[K]) {}
}

/// Backend holding exactly one object.
pub trait SingleRepository<O>: Send + Sync {
    /// Load the object, if stored
    fn get(&self) -> KeepsakeResult<Option<O>>;

    /// Persist the object
    fn save(&self, object: O) -> KeepsakeResult<()>;

    /// Prepare the backend for use. Returns `false` if it cannot be used.
    fn startup(&self) -> bool {
        true
    }

    /// Release backend resources
    fn shutdown(&self) {}

    /// Whether the backend keeps its own cache
    fn has_cache(&self) -> bool {
        false
    }

    /// Drop the backend's own cache, if it has one
    fn clear_cache(&self) {}
}
