//! Logging infrastructure for Repcoach.
//!
//! Centralized tracing setup shared by the binaries.

use tracing_subscriber::EnvFilter;

/// Initialize logging at the default `info` level.
///
/// The `RUST_LOG` environment variable overrides the default filter.
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific default level (debug, info, warn, error)
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}
