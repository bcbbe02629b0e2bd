//! Tracing setup for the ormodel CLI
//!
//! Usage:
//!   ormodel --debug ...                 # Debug logging, SQL included
//!   RUST_LOG=ormodel::sql=debug ormodel # Fine-grained log control
//!
//! Logs go to stderr so command output stays clean on stdout.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Tracing configuration options
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Enable debug logging (used unless RUST_LOG is set)
    pub debug: bool,
}

/// Initialize console tracing.
pub fn init(config: &TracingConfig) -> Result<()> {
    let default = if config.debug { "debug" } else { "info,sqlx=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.debug)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
