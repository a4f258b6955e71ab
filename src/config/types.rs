//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Address the dispatcher accepts client traffic on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Backend selection strategy
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Active health check settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Outbound forwarding settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Upstream servers, in registration order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Backend selection strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    Weighted,
    #[serde(alias = "p2c")]
    PowerOfTwo,
}

/// Active health check settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Whether backends are probed at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often to probe backends
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on a single probe
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// HTTP path to request
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Status a probe must return to count as healthy
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            path: default_health_path(),
            expected_status: default_expected_status(),
        }
    }
}

/// Outbound forwarding settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Connection timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// A single upstream server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Base address, e.g. `http://10.0.0.1:8080`
    pub address: String,

    /// Relative share of traffic for weighted selection (default: 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

// Default value functions
fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_health_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_expected_status() -> u16 {
    200
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
