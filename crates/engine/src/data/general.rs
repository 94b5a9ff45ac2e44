//! Server-wide data

use keepsake_core::{DataKey, JsonDataObject};

use super::json_entity;
use super::world::Position;

/// Singleton server-wide state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralData {
    node: JsonDataObject,
}

json_entity!(GeneralData);

impl GeneralData {
    /// Where new players first appear
    pub const FIRST_SPAWN: DataKey<Position, GeneralData> = DataKey::new(&["first_spawn"]);
    /// Kits handed to players on their first login
    pub const FIRST_JOIN_KITS: DataKey<Vec<String>, GeneralData> =
        DataKey::with_default(&["kits", "first_join"], Vec::new);
    /// Names of configured warps
    pub const WARPS: DataKey<Vec<String>, GeneralData> = DataKey::with_default(&["warps"], Vec::new);
}
