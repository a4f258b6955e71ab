//! Configuration validation.

use crate::backend::Backend;
use crate::backend::algorithms::Weight;
use crate::config::Config;
use std::collections::HashSet;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - Backend addresses that parse as `http` base addresses
/// - No two backends with the same identity
/// - Finite, positive weights
/// - Sane health check timings, path and status
///
/// # Returns
///
/// `Ok(())` if valid, or a message listing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    // Duplicates are detected on the normalized identity, so
    // `127.0.0.1:9000` and `http://127.0.0.1:9000` collide.
    let mut identities = HashSet::new();

    for backend in &config.backends {
        match Backend::new(&backend.address) {
            Ok(parsed) => {
                if !identities.insert(parsed.id().to_string()) {
                    errors.push(format!("duplicate backend address: {}", parsed.id()));
                }
            }
            Err(e) => errors.push(e.to_string()),
        }

        if let Some(weight) = backend.weight {
            if let Err(e) = Weight::new(weight) {
                errors.push(format!("backend '{}': {}", backend.address, e));
            }
        }
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval.is_zero() {
            errors.push("health_check.interval must be greater than zero".to_string());
        }
        if health.timeout.is_zero() {
            errors.push("health_check.timeout must be greater than zero".to_string());
        }
        if health.timeout > health.interval {
            errors.push(format!(
                "health_check.timeout ({:?}) must not exceed interval ({:?})",
                health.timeout, health.interval
            ));
        }
        if !health.path.starts_with('/') {
            errors.push(format!(
                "health_check.path '{}' must start with '/'",
                health.path
            ));
        }
        if !(100..=599).contains(&health.expected_status) {
            errors.push(format!(
                "health_check.expected_status {} is not a valid HTTP status",
                health.expected_status
            ));
        }
    }

    if config.proxy.connect_timeout.is_zero() {
        errors.push("proxy.connect_timeout must be greater than zero".to_string());
    }

    if !VALID_LOG_LEVELS.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            VALID_LOG_LEVELS.join(", ")
        ));
    }

    if config.global.metrics.enabled && !config.global.metrics.path.starts_with('/') {
        errors.push(format!(
            "metrics path '{}' must start with '/'",
            config.global.metrics.path
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
