//! Kit definitions

use keepsake_core::{DataKey, JsonDataObject, KeepsakeResult, KeyedDataObject};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::json_entity;

/// One named bundle of items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kit {
    /// Item stack descriptions, in slot order
    #[serde(default)]
    pub items: Vec<String>,
    /// Seconds before the same player may redeem it again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    /// Redeemable once per player
    #[serde(default)]
    pub one_time: bool,
}

/// Singleton holding every kit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KitData {
    node: JsonDataObject,
}

json_entity!(KitData);

impl KitData {
    /// All kits by name
    pub const KITS: DataKey<BTreeMap<String, Kit>, KitData> =
        DataKey::with_default(&["kits"], BTreeMap::new);

    /// The kit called `name`
    pub fn kit(&self, name: &str) -> Option<Kit> {
        self.get(&Self::KITS)?.remove(&name.to_lowercase())
    }

    /// Names of all kits, sorted
    pub fn kit_names(&self) -> Vec<String> {
        self.get_or_default(&Self::KITS)
            .map(|kits| kits.into_keys().collect())
            .unwrap_or_default()
    }

    /// Add or replace the kit called `name`. Names are case-insensitive.
    pub fn set_kit(&mut self, name: &str, kit: Kit) -> KeepsakeResult<()> {
        let mut kits = self.get_or_default(&Self::KITS).unwrap_or_default();
        kits.insert(name.to_lowercase(), kit);
        self.set(&Self::KITS, kits)
    }

    /// Remove the kit called `name`, returning it
    pub fn remove_kit(&mut self, name: &str) -> KeepsakeResult<Option<Kit>> {
        let mut kits = self.get_or_default(&Self::KITS).unwrap_or_default();
        let removed = kits.remove(&name.to_lowercase());
        if removed.is_some() {
            self.set(&Self::KITS, kits)?;
        }
        Ok(removed)
    }
}
