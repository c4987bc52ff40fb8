//! Tracing setup for binaries embedding Rollcall.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies (for
/// example `RollcallConfig::log_filter`). Calling this twice is harmless;
/// the second call leaves the first subscriber in place.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
