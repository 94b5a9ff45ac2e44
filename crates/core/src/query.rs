//! Query objects
//!
//! A query is a declarative filter over stored entities. Every backend can
//! answer a query restricted to an explicit set of keys; only backends that
//! report `supports_non_key_queries` may be asked anything else.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{Error, KeepsakeResult};

/// Declarative filter over entities keyed by `K`.
pub trait QueryObject<K>: Debug + Send + Sync {
    /// Explicit keys this query is limited to. Empty for an unrestricted query.
    fn keys(&self) -> &HashSet<K>;

    /// True when the query names its keys explicitly and carries no other
    /// criteria.
    fn restricted_to_keys(&self) -> bool;
}

/// Reject a query a backend cannot answer.
///
/// Fails with [`Error::UnsupportedQuery`] when the query is not restricted to
/// keys and the backend only supports primary-key lookups.
pub fn ensure_supported<K, Q>(query: &Q, supports_non_key_queries: bool) -> KeepsakeResult<()>
where
    Q: QueryObject<K> + ?Sized,
{
    if query.restricted_to_keys() || supports_non_key_queries {
        Ok(())
    } else {
        Err(Error::unsupported_query(format!(
            "backend only supports key-restricted queries, got {:?}",
            query
        )))
    }
}

/// Generic query that selects by primary key only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyQuery<K: Eq + Hash> {
    keys: HashSet<K>,
    restricted: bool,
}

impl<K: Eq + Hash> KeyQuery<K> {
    /// Select exactly these keys
    pub fn of(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            restricted: true,
        }
    }

    /// Select one key
    pub fn single(key: K) -> Self {
        Self::of(std::iter::once(key))
    }

    /// Select every stored entity. Not key-restricted.
    pub fn all() -> Self {
        Self {
            keys: HashSet::new(),
            restricted: false,
        }
    }
}

impl<K> QueryObject<K> for KeyQuery<K>
where
    K: Eq + Hash + Debug + Send + Sync,
{
    fn keys(&self) -> &HashSet<K> {
        &self.keys
    }

    fn restricted_to_keys(&self) -> bool {
        self.restricted
    }
}
