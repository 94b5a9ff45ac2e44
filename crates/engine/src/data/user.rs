//! Per-player data

use keepsake_core::{DataKey, JsonDataObject, QueryObject};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use super::json_entity;
use super::world::Position;
use crate::memory::JsonFilter;
use crate::versioning::DataVersioning;

/// Stored state of one player, keyed by their UUID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    node: JsonDataObject,
}

json_entity!(UserData);

impl UserData {
    /// Preferred message locale, e.g. `"en-GB"`
    pub const LOCALE: DataKey<String, UserData> = DataKey::new(&["locale"]);
    /// Name seen at the most recent login
    pub const LAST_KNOWN_NAME: DataKey<String, UserData> = DataKey::new(&["core", "last_known_name"]);
    /// Unix seconds of the first login
    pub const FIRST_JOIN: DataKey<u64, UserData> = DataKey::new(&["core", "first_join"]);
    /// Unix seconds of the latest login
    pub const LAST_LOGIN: DataKey<u64, UserData> = DataKey::new(&["core", "last_login"]);
    /// Named home locations
    pub const HOMES: DataKey<BTreeMap<String, Position>, UserData> =
        DataKey::with_default(&["homes"], BTreeMap::new);
    /// Whether the player was flying when last seen
    pub const FLYING: DataKey<bool, UserData> = DataKey::with_default(&["fly", "flying"], || false);

    /// Current data version of stored players
    pub const DATA_VERSION: u32 = 2;

    /// Versioning applied to every loaded or created player
    pub fn versioning() -> DataVersioning<UserData> {
        DataVersioning::new(Self::DATA_VERSION).step(1, hoist_locale)
    }
}

// Version 1 kept the locale under `core`.
fn hoist_locale(node: &mut JsonDataObject) {
    if let Some(locale) = node.remove_node(&["core", "locale"]) {
        if node.node(&["locale"]).is_none() {
            if let Err(e) = node.set_node(&["locale"], locale) {
                warn!(target: "keepsake::versioning", error = %e, "Could not move locale");
            }
        }
    }
}

/// Query over players.
///
/// Restricted to keys unless a locale or name criterion is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    keys: HashSet<Uuid>,
    locale: Option<String>,
    name: Option<String>,
}

impl UserQuery {
    /// Select one player
    pub fn for_user(uuid: Uuid) -> Self {
        Self::for_users([uuid])
    }

    /// Select these players
    pub fn for_users(uuids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            keys: uuids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Every player
    pub fn all() -> Self {
        Self::default()
    }

    /// Only players whose locale is `locale`
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Only players last seen as `name` (case-insensitive)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl QueryObject<Uuid> for UserQuery {
    fn keys(&self) -> &HashSet<Uuid> {
        &self.keys
    }

    fn restricted_to_keys(&self) -> bool {
        !self.keys.is_empty() && self.locale.is_none() && self.name.is_none()
    }
}

impl JsonFilter<Uuid> for UserQuery {
    fn matches(&self, _key: &Uuid, stored: &Value) -> bool {
        if let Some(locale) = &self.locale {
            if stored.get("locale").and_then(Value::as_str) != Some(locale.as_str()) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            let stored_name = stored
                .pointer("/core/last_known_name")
                .and_then(Value::as_str);
            if !stored_name.map_or(false, |n| n.eq_ignore_ascii_case(name)) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::{JsonBacked, KeyedDataObject};
    use serde_json::json;

    #[test]
    fn locale_round_trips() {
        let mut user = UserData::default();
        user.set(&UserData::LOCALE, "en-GB".to_string()).unwrap();
        assert_eq!(user.get(&UserData::LOCALE).as_deref(), Some("en-GB"));
        assert_eq!(user.node().to_value(), json!({"locale": "en-GB"}));
    }

    #[test]
    fn defaults_apply_when_absent() {
        let user = UserData::default();
        assert_eq!(user.get_or_default(&UserData::FLYING), Some(false));
        assert_eq!(user.get_or_default(&UserData::HOMES), Some(BTreeMap::new()));
        assert_eq!(user.get(&UserData::FIRST_JOIN), None);
    }

    #[test]
    fn homes_edit_in_place() {
        let mut user = UserData::default();
        {
            let mut homes = user.edit(UserData::HOMES);
            homes
                .value_mut()
                .get_or_insert_with(BTreeMap::new)
                .insert("base".into(), Position::new("world", 1.0, 64.0, -3.0));
        }
        let homes = user.get(&UserData::HOMES).unwrap();
        assert_eq!(homes["base"].y, 64.0);
    }

    #[test]
    fn version_one_locale_is_hoisted() {
        use keepsake_core::Migration;

        let stored = json!({"core": {"locale": "fr-FR", "last_known_name": "Alex"}});
        let mut user = UserData::from_node(JsonDataObject::from_value(stored).unwrap());
        UserData::versioning().upgrade(&mut user);

        assert_eq!(user.get(&UserData::LOCALE).as_deref(), Some("fr-FR"));
        assert_eq!(user.get(&UserData::LAST_KNOWN_NAME).as_deref(), Some("Alex"));
        assert_eq!(
            DataVersioning::<UserData>::version_of(user.node()),
            UserData::DATA_VERSION
        );
    }

    #[test]
    fn query_restriction() {
        let id = Uuid::new_v4();
        assert!(UserQuery::for_user(id).restricted_to_keys());
        assert!(!UserQuery::for_user(id).with_locale("fr-FR").restricted_to_keys());
        assert!(!UserQuery::all().restricted_to_keys());
    }

    #[test]
    fn query_filters_rows() {
        let id = Uuid::new_v4();
        let row = json!({"locale": "en-GB", "core": {"last_known_name": "Steve"}});
        assert!(UserQuery::all().with_locale("en-GB").matches(&id, &row));
        assert!(!UserQuery::all().with_locale("de-DE").matches(&id, &row));
        assert!(UserQuery::all().with_name("steve").matches(&id, &row));
        assert!(!UserQuery::all().with_name("alex").matches(&id, &row));
    }
}
