//! Logging setup for the command-line tool.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary. `RUST_LOG` overrides the default directive.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Install a global fmt subscriber.
///
/// Fails if a global subscriber was already installed.
pub fn init_logging(default_directive: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::Configuration(format!("Unable to install logger: {}", e)))
}
