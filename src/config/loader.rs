//! Configuration file loading.

use crate::config::{Config, validate_config};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a YAML file.
///
/// This function reads the file, parses the YAML, and validates the configuration.
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Returns
///
/// The parsed and validated configuration, or an error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    // Read file contents
    let contents = std::fs::read_to_string(path)?;

    // Parse YAML
    let config: Config = serde_yaml::from_str(&contents)?;

    // Validate configuration
    validate_config(&config).map_err(ConfigError::ValidationError)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, LogFormat};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
backends:
  - address: "http://127.0.0.1:9000"
  - address: "127.0.0.1:9001"
    weight: 3
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].weight, Some(3.0));
        assert_eq!(config.algorithm, Algorithm::RoundRobin);
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
global:
  log_level: debug
  log_format: pretty
  metrics:
    enabled: false
listen: "0.0.0.0:8000"
algorithm: p2c
health_check:
  interval: 5s
  timeout: 500ms
  path: /healthz
  expected_status: 204
proxy:
  connect_timeout: 3s
backends:
  - address: "http://10.0.0.1:8080"
  - address: "http://10.0.0.2:8080"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.global.log_format, LogFormat::Pretty);
        assert!(!config.global.metrics.enabled);
        assert_eq!(config.listen, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.algorithm, Algorithm::PowerOfTwo);
        assert_eq!(config.health_check.timeout, Duration::from_millis(500));
        assert_eq!(config.health_check.path, "/healthz");
        assert_eq!(config.health_check.expected_status, 204);
        assert_eq!(config.proxy.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let yaml = r#"
backends:
  - address: "http://127.0.0.1:9000"
    weight: 0
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
