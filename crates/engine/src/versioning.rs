//! Data versioning for JSON-backed entities
//!
//! Every stored tree carries a `data_version` node. New objects are stamped
//! with the current version; loaded objects run each upgrade step from their
//! stored version up to the current one and are then restamped.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use keepsake_core::{JsonBacked, JsonDataObject, Migration};
use serde_json::Value;
use tracing::{debug, warn};

/// Node path of the stored version number
pub const DATA_VERSION_PATH: &[&str] = &["data_version"];

/// Version assumed for trees written before versions were stamped
pub const UNVERSIONED: u32 = 1;

/// One upgrade step, turning a tree at version `n` into version `n + 1`
pub type UpgradeStep = fn(&mut JsonDataObject);

/// Ordered upgrade steps for entity type `D`.
pub struct DataVersioning<D> {
    current: u32,
    steps: BTreeMap<u32, UpgradeStep>,
    _marker: PhantomData<fn() -> D>,
}

impl<D> DataVersioning<D> {
    /// Versioning whose current version is `current`, with no steps
    pub fn new(current: u32) -> Self {
        Self {
            current,
            steps: BTreeMap::new(),
            _marker: PhantomData,
        }
    }

    /// Register the step that upgrades a tree at `from` to `from + 1`.
    pub fn step(mut self, from: u32, upgrade: UpgradeStep) -> Self {
        self.steps.insert(from, upgrade);
        self
    }

    /// The version new and upgraded objects end up at
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Stored version of `node`
    pub fn version_of(node: &JsonDataObject) -> u32 {
        node.node(DATA_VERSION_PATH)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(UNVERSIONED)
    }

    fn write_version(&self, node: &mut JsonDataObject) {
        if let Err(e) = node.set_node(DATA_VERSION_PATH, Value::from(self.current)) {
            warn!(target: "keepsake::versioning", error = %e, "Could not stamp data version");
        }
    }
}

impl<D> fmt::Debug for DataVersioning<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataVersioning")
            .field("current", &self.current)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<D: JsonBacked> Migration<D> for DataVersioning<D> {
    fn stamp_version(&self, data: &mut D) {
        self.write_version(data.node_mut());
    }

    fn upgrade(&self, data: &mut D) {
        let node = data.node_mut();
        let stored = Self::version_of(node);
        if stored >= self.current {
            if stored > self.current {
                warn!(
                    target: "keepsake::versioning",
                    stored,
                    current = self.current,
                    "Stored data is newer than this build understands"
                );
            }
            return;
        }

        for (_, step) in self.steps.range(stored..self.current) {
            step(&mut *node);
        }
        self.write_version(node);
        debug!(target: "keepsake::versioning", from = stored, to = self.current, "Upgraded stored data");
    }
}
