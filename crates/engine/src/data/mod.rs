//! Built-in persisted entities
//!
//! Each entity wraps a [`JsonDataObject`] and exposes its fields as
//! [`DataKey`](keepsake_core::DataKey) constants. Feature code reads and
//! writes through those keys and never sees the underlying tree.
//!
//! [`JsonDataObject`]: keepsake_core::JsonDataObject

/// Implement `JsonBacked` for a newtype over `JsonDataObject`.
macro_rules! json_entity {
    ($name:ident) => {
        impl keepsake_core::JsonBacked for $name {
            fn node(&self) -> &keepsake_core::JsonDataObject {
                &self.node
            }

            fn node_mut(&mut self) -> &mut keepsake_core::JsonDataObject {
                &mut self.node
            }

            fn from_node(node: keepsake_core::JsonDataObject) -> Self {
                Self { node }
            }
        }
    };
}

pub(crate) use json_entity;

pub mod general;
pub mod kit;
pub mod user;
pub mod world;

pub use general::GeneralData;
pub use kit::{Kit, KitData};
pub use user::{UserData, UserQuery};
pub use world::{Position, WorldData, WorldKey, WorldQuery};
