//! Tracing bootstrap for applications embedding the dispatcher.
//!
//! The dispatcher crates only emit `tracing` events; they never install a
//! subscriber themselves. Applications call [`init_from_config`] (or [`init`])
//! once at startup.
//!
//! ```no_run
//! use gateway_core::{logging, DispatcherConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DispatcherConfig::load_from("config/gateway.toml")?;
//! logging::init_from_config(&config)?;
//! tracing::info!(host = %config.gateway.host, "dispatcher starting");
//! # Ok(())
//! # }
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{DispatcherConfig, LogFormat, LoggingConfig};
use crate::error::{DispatchError, Result};

/// Initialize tracing from the dispatcher configuration.
pub fn init_from_config(config: &DispatcherConfig) -> Result<()> {
    init(&config.logging)
}

/// Initialize tracing with the given logging settings.
///
/// `RUST_LOG` takes precedence over the configured level. Idempotent: if a
/// global subscriber is already installed this returns `Ok(())`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let fmt_layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().with_filter(env_filter).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_filter(env_filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .or_else(|e| {
            // Expected in tests and when the host application set its own subscriber
            if e.to_string().contains("global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(DispatchError::Configuration(format!(
                    "Failed to initialize tracing: {}",
                    e
                )))
            }
        })
}

/// Parse a log level string into a tracing [`Level`].
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DispatchError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}
