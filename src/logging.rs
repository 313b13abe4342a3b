//! Tracing subscriber setup for the binary.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter applied when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Raised when a global subscriber is already installed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to install tracing subscriber: {0}")]
pub struct LoggingError(pub String);

/// Builds the filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a compact formatter writing to stderr, leaving stdout free for
/// command output.
///
/// # Errors
///
/// Returns [`LoggingError`] when a global subscriber is already set.
pub fn init() -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .with(env_filter())
        .try_init()
        .map_err(|err| LoggingError(err.to_string()))
}
