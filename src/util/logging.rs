//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level` when it is set.
///
/// # Arguments
///
/// * `level` - Log level filter (e.g., "info", "debug")
/// * `format` - Log output format (json or pretty)
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(
    level: &str,
    format: &LogFormat,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process
    #[test]
    fn test_second_init_fails() {
        let _ = init_logging("warn", &LogFormat::Pretty);
        assert!(init_logging("warn", &LogFormat::Json).is_err());
    }
}
