//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, StrataError};

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
///
/// # Errors
/// Returns `StrataError::Logging` if neither source yields a valid filter.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| StrataError::Logging(format!("invalid level '{}': {}", config.level, e)))
}

/// Install the global tracing subscriber.
///
/// Output goes to stderr so command output on stdout stays machine-readable.
///
/// # Errors
/// Returns `StrataError::Logging` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let json_layer = config.json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!config.json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| StrataError::Logging(e.to_string()))
}
