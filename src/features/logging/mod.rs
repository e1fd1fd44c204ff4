//! Subscriber setup for binaries and tests embedding the transaction manager.
//! The library itself only emits `tracing` events.

pub mod config;

pub use config::{LogFormat, LogLevel, LoggingConfig};

use crate::core::error::{Error, Result};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Install a global subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns `Ok(false)` when a global subscriber is already installed, so
/// calling this more than once is harmless.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    config.validate().map_err(Error::Config)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))
        .map_err(|e| Error::Config(format!("invalid log filter: {}", e)))?;

    let registry = Registry::default().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_timer(SystemTime)
                    .with_target(config.with_target)
                    .with_line_number(config.with_line_numbers)
                    .with_thread_ids(config.with_thread_ids)
                    .with_thread_names(true),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_timer(SystemTime)
                    .with_target(config.with_target)
                    .with_line_number(config.with_line_numbers)
                    .with_thread_ids(config.with_thread_ids),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_timer(SystemTime)
                    .with_target(config.with_target)
                    .with_line_number(config.with_line_numbers)
                    .with_thread_ids(config.with_thread_ids),
            )
            .try_init(),
    };

    Ok(installed.is_ok())
}
