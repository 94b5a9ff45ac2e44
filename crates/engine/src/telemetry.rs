//! Logging setup
//!
//! Every crate logs through `tracing` under `keepsake::*` targets. Hosts that
//! already install a subscriber need not call anything here.

use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter that overrides the default directive
pub const LOG_ENV_VAR: &str = "KEEPSAKE_LOG";

/// Install a formatting subscriber filtered by `KEEPSAKE_LOG`, falling back
/// to `default_directive` (e.g. `"keepsake=info"`).
///
/// Returns `false` without changing anything if a global subscriber is
/// already installed, so calling this more than once is harmless.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
