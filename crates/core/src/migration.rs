//! Data version hooks
//!
//! The storage service stamps every freshly created object and upgrades every
//! object loaded from a backend, once, before it is cached or returned.
//! Consumers never call these hooks directly.

/// Version hooks for domain objects of type `D`.
pub trait Migration<D>: Send + Sync {
    /// Mark a freshly created object with the current data version.
    fn stamp_version(&self, data: &mut D);

    /// Bring a loaded object to the current shape. Must be a no-op on an
    /// object that is already current.
    fn upgrade(&self, data: &mut D);
}

/// Hooks that do nothing, for entities without versioned data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMigration;

impl<D> Migration<D> for NoMigration {
    fn stamp_version(&self, _data: &mut D) {}

    fn upgrade(&self, _data: &mut D) {}
}
