//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::health::HealthSettings;

/// Root configuration for the balancer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Traversal source the alias `g` is bound to on every backend.
    pub traversal_source: String,

    /// Backend addresses, in pool order.
    pub endpoints: Vec<String>,

    /// Health monitor timing.
    pub health_check: HealthCheckConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            traversal_source: "g".to_string(),
            endpoints: vec!["ws://localhost:8182/gremlin".to_string()],
            health_check: HealthCheckConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Interval between recovery passes in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds. Must be below the interval.
    pub probe_timeout_ms: u64,

    /// Session open timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            probe_timeout_ms: 2_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl HealthCheckConfig {
    pub fn settings(&self) -> HealthSettings {
        HealthSettings {
            interval: Duration::from_millis(self.interval_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
