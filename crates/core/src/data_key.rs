//! Typed field tokens
//!
//! A [`DataKey`] names one attribute of a data object without exposing the
//! object's internal shape. It is typed on both the value it reads and writes
//! (`V`) and the object it applies to (`O`), so a key declared for one entity
//! cannot be used on another.

use std::fmt;
use std::marker::PhantomData;

/// Opaque, typed field identifier.
///
/// Keys are plain constants:
///
/// ```
/// use keepsake_core::DataKey;
///
/// struct Profile;
/// const LOCALE: DataKey<String, Profile> = DataKey::new(&["locale"]);
/// assert_eq!(LOCALE.dotted(), "locale");
/// ```
pub struct DataKey<V, O> {
    path: &'static [&'static str],
    default: Option<fn() -> V>,
    _target: PhantomData<fn() -> O>,
}

impl<V, O> DataKey<V, O> {
    /// A key at `path` with no default value.
    pub const fn new(path: &'static [&'static str]) -> Self {
        Self {
            path,
            default: None,
            _target: PhantomData,
        }
    }

    /// A key at `path` whose absent value reads as `default()` through
    /// `get_or_default`.
    pub const fn with_default(path: &'static [&'static str], default: fn() -> V) -> Self {
        Self {
            path,
            default: Some(default),
            _target: PhantomData,
        }
    }

    /// Path segments from the object root.
    pub fn path(&self) -> &'static [&'static str] {
        self.path
    }

    /// The declared default, if any.
    pub fn default_value(&self) -> Option<V> {
        self.default.map(|f| f())
    }

    /// Path joined with `.`, for logs.
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

impl<V, O> Clone for DataKey<V, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V, O> Copy for DataKey<V, O> {}

impl<V, O> fmt::Debug for DataKey<V, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("path", &self.path)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}
