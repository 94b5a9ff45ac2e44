//! Translators between domain objects and their stored form
//!
//! A translator is pure: no I/O, no locking. It must accept any stored object
//! it produced for the current schema version.

use std::marker::PhantomData;

use serde_json::Value;

use crate::data_object::{JsonBacked, JsonDataObject};
use crate::error::KeepsakeResult;

/// Bidirectional mapping between a domain object `D` and a stored object `O`.
pub trait DataTranslator<D, O>: Send + Sync {
    /// Domain object to stored form
    fn to_storage(&self, data: &D) -> KeepsakeResult<O>;

    /// Stored form to domain object
    fn from_storage(&self, stored: O) -> KeepsakeResult<D>;

    /// A fresh, unversioned domain object
    fn create_new(&self) -> D;
}

/// Translator for [`JsonBacked`] objects stored as JSON values.
pub struct JsonTranslator<D> {
    _marker: PhantomData<fn() -> D>,
}

impl<D> JsonTranslator<D> {
    /// Create a translator
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<D> Default for JsonTranslator<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: JsonBacked> DataTranslator<D, Value> for JsonTranslator<D> {
    fn to_storage(&self, data: &D) -> KeepsakeResult<Value> {
        Ok(data.node().to_value())
    }

    fn from_storage(&self, stored: Value) -> KeepsakeResult<D> {
        JsonDataObject::from_value(stored).map(D::from_node)
    }

    fn create_new(&self) -> D {
        D::from_node(JsonDataObject::new())
    }
}
