//! Storage configuration via `keepsake.toml`
//!
//! On first start a commented default `keepsake.toml` is written next to the
//! plugin's data. To change settings, edit the file and reload.

use keepsake_core::{Error, KeepsakeResult};
use keepsake_storage::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the plugin data directory.
pub const CONFIG_FILE_NAME: &str = "keepsake.toml";

/// Storage configuration loaded from `keepsake.toml`.
///
/// # Example
///
/// ```toml
/// cache_ttl_secs = 300
/// # lock_timeout_ms = 5000
/// worker_threads = 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepsakeConfig {
    /// Idle seconds before a cached object and its key lock are evicted.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Upper bound on waiting for a key lock. Absent means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
    /// Worker threads for storage I/O dispatched from the main thread.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Maximum queued storage tasks before new ones are rejected.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Seconds between idle eviction passes.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_worker_threads() -> usize {
    2
}

fn default_max_queue_depth() -> usize {
    4096
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for KeepsakeConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            lock_timeout_ms: None,
            worker_threads: default_worker_threads(),
            max_queue_depth: default_max_queue_depth(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl KeepsakeConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Keepsake storage configuration
#
# Seconds a cached object (and its key lock) may sit unused before it is
# evicted. Dirty objects are saved before eviction.
cache_ttl_secs = 300

# Maximum milliseconds to wait for a key lock. Leave unset to wait
# indefinitely; when set, a stalled backend surfaces as a lock timeout.
# lock_timeout_ms = 5000

# Worker threads for storage work started from the main thread.
worker_threads = 2

# Maximum queued storage tasks before new ones are rejected.
max_queue_depth = 4096

# Seconds between idle eviction passes.
sweep_interval_secs = 60
"#
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero TTL, worker count, queue depth,
    /// sweep interval or lock timeout.
    pub fn validate(&self) -> KeepsakeResult<()> {
        if self.cache_ttl_secs == 0 {
            return Err(Error::Config("cache_ttl_secs must be at least 1".into()));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be at least 1".into()));
        }
        if self.max_queue_depth == 0 {
            return Err(Error::Config("max_queue_depth must be at least 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be at least 1".into()));
        }
        if self.lock_timeout_ms == Some(0) {
            return Err(Error::Config(
                "lock_timeout_ms must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Per-service tuning derived from this config
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            lock_timeout: self.lock_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Interval between idle eviction passes
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> KeepsakeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: KeepsakeConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> KeepsakeResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Load the config at `path`, creating the default file first if needed.
    pub fn load_or_create(path: &Path) -> KeepsakeResult<Self> {
        Self::write_default_if_missing(path)?;
        Self::from_file(path)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> KeepsakeResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
