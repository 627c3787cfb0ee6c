//! Tracing subscriber setup for the `block-csi` binary.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Raised when the filter directive cannot be parsed.
    #[error("invalid log filter `{directive}`: {message}")]
    Filter {
        /// Directive that failed to parse.
        directive: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Builds the filter from `RUST_LOG`, falling back to `fallback`.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] when `fallback` is not a valid directive.
pub fn env_filter(fallback: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(fallback).map_err(|err| LoggingError::Filter {
            directive: fallback.to_owned(),
            message: err.to_string(),
        })
    })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid or a subscriber is
/// already installed.
pub fn init(format: LogFormat, fallback: &str) -> Result<(), LoggingError> {
    let filter = env_filter(fallback)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|err| LoggingError::Install(err.to_string()))
}
