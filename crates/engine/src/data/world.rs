//! Per-world data

use keepsake_core::{DataKey, Error, JsonDataObject, KeepsakeResult, QueryObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::json_entity;
use crate::memory::JsonFilter;

/// Namespaced world identifier, e.g. `minecraft:overworld`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorldKey {
    namespace: String,
    value: String,
}

impl WorldKey {
    /// Build a key from its two parts
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            value: value.into(),
        }
    }

    /// A key in the `minecraft` namespace
    pub fn minecraft(value: impl Into<String>) -> Self {
        Self::new("minecraft", value)
    }

    /// Namespace part
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Value part
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for WorldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.value)
    }
}

impl FromStr for WorldKey {
    type Err = Error;

    fn from_str(s: &str) -> KeepsakeResult<Self> {
        match s.split_once(':') {
            Some((ns, value)) if !ns.is_empty() && !value.is_empty() && !value.contains(':') => {
                Ok(Self::new(ns, value))
            }
            _ => Err(Error::InvalidOperation(format!(
                "world key '{}' is not of the form namespace:value",
                s
            ))),
        }
    }
}

impl TryFrom<String> for WorldKey {
    type Error = Error;

    fn try_from(s: String) -> KeepsakeResult<Self> {
        s.parse()
    }
}

impl From<WorldKey> for String {
    fn from(key: WorldKey) -> String {
        key.to_string()
    }
}

/// A point in a named world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// World the point is in
    pub world: String,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Position {
    /// Build a position
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

/// Stored state of one world.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldData {
    node: JsonDataObject,
}

json_entity!(WorldData);

impl WorldData {
    /// Spawn point players are sent to
    pub const SPAWN: DataKey<Position, WorldData> = DataKey::new(&["spawn", "position"]);
    /// Send players to spawn on every login
    pub const SPAWN_ON_LOGIN: DataKey<bool, WorldData> =
        DataKey::with_default(&["spawn", "on_login"], || false);
    /// Block entry for players without bypass permission
    pub const LOCKED: DataKey<bool, WorldData> = DataKey::with_default(&["locked"], || false);
}

/// Query over worlds. Only ever restricted to keys, or selecting all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldQuery {
    keys: HashSet<WorldKey>,
}

impl WorldQuery {
    /// Select these worlds
    pub fn for_worlds(keys: impl IntoIterator<Item = WorldKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Every world
    pub fn all() -> Self {
        Self::default()
    }
}

impl QueryObject<WorldKey> for WorldQuery {
    fn keys(&self) -> &HashSet<WorldKey> {
        &self.keys
    }

    fn restricted_to_keys(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl JsonFilter<WorldKey> for WorldQuery {
    fn matches(&self, _key: &WorldKey, _stored: &Value) -> bool {
        true
    }
}
