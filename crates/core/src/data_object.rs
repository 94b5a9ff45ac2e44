//! Field containers for stored entities
//!
//! Domain objects are thin wrappers around a [`JsonDataObject`], a tree of
//! named nodes. Feature code reads and writes individual attributes through
//! [`DataKey`] tokens via the [`KeyedDataObject`] trait and never touches
//! the tree directly.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::data_key::DataKey;
use crate::error::{Error, KeepsakeResult};

/// Node tree backing a data object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonDataObject {
    root: Map<String, Value>,
}

impl JsonDataObject {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a stored JSON value. The value must be an object.
    pub fn from_value(value: Value) -> KeepsakeResult<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(Error::Serialization(format!(
                "expected a JSON object at the data root, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Clone the tree into a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Consume the tree into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Node at `path`, if present
    pub fn node(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }

    /// Write `value` at `path`, creating intermediate nodes. Intermediate
    /// nodes that are not objects are replaced.
    pub fn set_node(&mut self, path: &[&str], value: Value) -> KeepsakeResult<()> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| Error::InvalidOperation("data key path is empty".to_string()))?;
        let mut map = &mut self.root;
        for segment in parents {
            let entry = map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            map = match entry {
                Value::Object(m) => m,
                _ => unreachable!("node was replaced with an object above"),
            };
        }
        map.insert((*last).to_string(), value);
        Ok(())
    }

    /// Remove the node at `path`, returning it.
    pub fn remove_node(&mut self, path: &[&str]) -> Option<Value> {
        let (last, parents) = path.split_last()?;
        let mut map = &mut self.root;
        for segment in parents {
            map = map.get_mut(*segment)?.as_object_mut()?;
        }
        map.remove(*last)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Implemented by domain objects that wrap a [`JsonDataObject`].
///
/// Gives the type [`KeyedDataObject`] through a blanket impl and makes it
/// usable with `JsonTranslator`.
pub trait JsonBacked: Sized {
    /// Shared view of the backing tree
    fn node(&self) -> &JsonDataObject;

    /// Mutable view of the backing tree
    fn node_mut(&mut self) -> &mut JsonDataObject;

    /// Rebuild the object from a tree
    fn from_node(node: JsonDataObject) -> Self;
}

/// Typed attribute access through [`DataKey`] tokens.
pub trait KeyedDataObject: Sized {
    /// Read the attribute. Absent, or stored with an incompatible shape,
    /// reads as `None`.
    fn get<V: DeserializeOwned>(&self, key: &DataKey<V, Self>) -> Option<V>;

    /// Write the attribute.
    fn set<V: Serialize>(&mut self, key: &DataKey<V, Self>, value: V) -> KeepsakeResult<()>;

    /// Clear the attribute.
    fn remove<V>(&mut self, key: &DataKey<V, Self>);

    /// True if the attribute is present.
    fn has<V>(&self, key: &DataKey<V, Self>) -> bool;

    /// Read the attribute, falling back to the key's declared default.
    fn get_or_default<V: DeserializeOwned>(&self, key: &DataKey<V, Self>) -> Option<V> {
        self.get(key).or_else(|| key.default_value())
    }

    /// Scoped read-modify-write of one attribute. The value held by the guard
    /// is written back when it drops; `None` clears the attribute.
    fn edit<V>(&mut self, key: DataKey<V, Self>) -> ValueGuard<'_, Self, V>
    where
        V: Serialize + DeserializeOwned,
    {
        let value = self.get(&key);
        ValueGuard {
            target: self,
            key,
            value,
        }
    }
}

impl<T: JsonBacked> KeyedDataObject for T {
    fn get<V: DeserializeOwned>(&self, key: &DataKey<V, Self>) -> Option<V> {
        let node = self.node().node(key.path())?;
        match serde_json::from_value(node.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    target: "keepsake::data",
                    key = %key.dotted(),
                    error = %e,
                    "Stored value does not match the data key type"
                );
                None
            }
        }
    }

    fn set<V: Serialize>(&mut self, key: &DataKey<V, Self>, value: V) -> KeepsakeResult<()> {
        let value = serde_json::to_value(value)?;
        self.node_mut().set_node(key.path(), value)
    }

    fn remove<V>(&mut self, key: &DataKey<V, Self>) {
        self.node_mut().remove_node(key.path());
    }

    fn has<V>(&self, key: &DataKey<V, Self>) -> bool {
        self.node().node(key.path()).is_some()
    }
}

/// Holder returned by [`KeyedDataObject::edit`].
pub struct ValueGuard<'a, O, V>
where
    O: KeyedDataObject,
    V: Serialize + DeserializeOwned,
{
    target: &'a mut O,
    key: DataKey<V, O>,
    value: Option<V>,
}

impl<'a, O, V> ValueGuard<'a, O, V>
where
    O: KeyedDataObject,
    V: Serialize + DeserializeOwned,
{
    /// Current value held by the guard
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Mutable access to the held value
    pub fn value_mut(&mut self) -> &mut Option<V> {
        &mut self.value
    }

    /// Replace the held value
    pub fn set(&mut self, value: Option<V>) {
        self.value = value;
    }
}

impl<'a, O, V> Drop for ValueGuard<'a, O, V>
where
    O: KeyedDataObject,
    V: Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        match self.value.take() {
            None => self.target.remove(&self.key),
            Some(value) => {
                if let Err(e) = self.target.set(&self.key, value) {
                    warn!(
                        target: "keepsake::data",
                        key = %self.key.dotted(),
                        error = %e,
                        "Could not write back edited value"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Profile(JsonDataObject);

    impl JsonBacked for Profile {
        fn node(&self) -> &JsonDataObject {
            &self.0
        }
        fn node_mut(&mut self) -> &mut JsonDataObject {
            &mut self.0
        }
        fn from_node(node: JsonDataObject) -> Self {
            Profile(node)
        }
    }

    const LOCALE: DataKey<String, Profile> = DataKey::new(&["locale"]);
    const HOME_COUNT: DataKey<u32, Profile> = DataKey::with_default(&["homes", "count"], || 0);
    const NICKNAMES: DataKey<Vec<String>, Profile> = DataKey::new(&["names", "nick"]);

    #[test]
    fn test_set_and_get_nested() {
        let mut profile = Profile::default();
        profile.set(&HOME_COUNT, 3).unwrap();
        assert_eq!(profile.get(&HOME_COUNT), Some(3));
        assert_eq!(profile.node().to_value(), json!({"homes": {"count": 3}}));
    }

    #[test]
    fn test_absent_reads_none_and_default() {
        let profile = Profile::default();
        assert_eq!(profile.get(&HOME_COUNT), None);
        assert_eq!(profile.get_or_default(&HOME_COUNT), Some(0));
        assert_eq!(profile.get_or_default(&LOCALE), None);
        assert!(!profile.has(&LOCALE));
    }

    #[test]
    fn test_type_mismatch_reads_none() {
        let node = JsonDataObject::from_value(json!({"locale": 17})).unwrap();
        let profile = Profile::from_node(node);
        assert!(profile.has(&LOCALE));
        assert_eq!(profile.get(&LOCALE), None);
    }

    #[test]
    fn test_remove() {
        let mut profile = Profile::default();
        profile.set(&LOCALE, "en-GB".to_string()).unwrap();
        profile.remove(&LOCALE);
        assert!(!profile.has(&LOCALE));
        // Removing an absent nested key is a no-op
        profile.remove(&HOME_COUNT);
    }

    #[test]
    fn test_set_replaces_scalar_parent() {
        let node = JsonDataObject::from_value(json!({"homes": 5})).unwrap();
        let mut profile = Profile::from_node(node);
        profile.set(&HOME_COUNT, 2).unwrap();
        assert_eq!(profile.get(&HOME_COUNT), Some(2));
    }

    #[test]
    fn test_edit_guard_writes_back_on_drop() {
        let mut profile = Profile::default();
        {
            let mut names = profile.edit(NICKNAMES);
            assert!(names.value().is_none());
            names.value_mut().get_or_insert_with(Vec::new).push("Steve".to_string());
        }
        assert_eq!(profile.get(&NICKNAMES), Some(vec!["Steve".to_string()]));

        {
            let mut names = profile.edit(NICKNAMES);
            names.set(None);
        }
        assert!(!profile.has(&NICKNAMES));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        let err = JsonDataObject::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let mut node = JsonDataObject::new();
        assert!(node.set_node(&[], json!(1)).is_err());
        assert!(node.remove_node(&[]).is_none());
    }
}
