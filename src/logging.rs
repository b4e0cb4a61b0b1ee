//! Tracing subscriber setup.

use crate::error::{CacheError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a global tracing subscriber with the given filter directive.
///
/// Fails if the directive cannot be parsed or a subscriber is already set.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| CacheError::InvalidArgument(format!("Invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| CacheError::InvalidArgument("Logging already initialized".into()))
}
