//! Logging bootstrap for binaries and demos

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,runstore=debug";

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG`.
///
/// Calling it again, or after another subscriber was installed, does nothing.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
