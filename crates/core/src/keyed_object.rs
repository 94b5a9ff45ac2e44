//! Result of a unique-match query

/// A key that matched a query, together with its data.
///
/// The key is always known; `value` is `None` when the key matched but no
/// readable data exists for it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedObject<K, D> {
    /// Matched key
    pub key: K,
    /// Data stored under the key, if any
    pub value: Option<D>,
}

impl<K, D> KeyedObject<K, D> {
    /// Pair a key with a value
    pub fn new(key: K, value: Option<D>) -> Self {
        Self { key, value }
    }

    /// A key with no data
    pub fn empty(key: K) -> Self {
        Self { key, value: None }
    }

    /// Transform the value, keeping the key
    pub fn map_value<E>(self, f: impl FnOnce(D) -> E) -> KeyedObject<K, E> {
        KeyedObject {
            key: self.key,
            value: self.value.map(f),
        }
    }

    /// Fallible [`KeyedObject::map_value`]
    pub fn try_map_value<E, Err>(
        self,
        f: impl FnOnce(D) -> Result<E, Err>,
    ) -> Result<KeyedObject<K, E>, Err> {
        let value = self.value.map(f).transpose()?;
        Ok(KeyedObject {
            key: self.key,
            value,
        })
    }
}
