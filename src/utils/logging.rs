//! Structured logging setup.
//!
//! The driver only emits `tracing` events; installing a subscriber is up to
//! the application. [`init_logging`] is a convenience that builds a `fmt`
//! subscriber from a [`LoggingConfig`], honouring `RUST_LOG` when it is set.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{IprotoError, Result};

/// Build the env filter for `config`, preferring `RUST_LOG` when present
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()))
}

/// Install a global `fmt` subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| IprotoError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, "Logging initialized");
    Ok(())
}
