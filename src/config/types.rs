use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub servers: Vec<ServerEndpoint>,
}

/// Process-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Interval between health probe rounds
    pub health_check_interval_ms: u64,
    /// Consecutive failed probes before a server is marked unhealthy
    pub health_unhealthy_threshold: u32,
    /// Consecutive successful probes before a server is marked healthy
    pub health_healthy_threshold: u32,
    /// Metrics exposition format: "prometheus" or "json"
    pub metrics_export_format: MetricsFormat,
    /// Retry once against an alternate server of the same service type on
    /// transient failure
    pub failover_enabled: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 10_000,
            health_unhealthy_threshold: 3,
            health_healthy_threshold: 2,
            metrics_export_format: MetricsFormat::Prometheus,
            failover_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricsFormat {
    #[default]
    Prometheus,
    Json,
}

/// Registration spec for one tool server. Immutable after registration;
/// re-registering under the same name replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEndpoint {
    pub name: String,
    /// Transport address: `stdio:<command> [args...]`, `http(s)://...` or
    /// `tcp://host:port`
    pub address: String,
    /// Logical capability category; interchangeable servers share one
    pub service_type: String,
    /// Lower value wins primary selection among healthy peers
    pub priority: u32,
    pub enabled: bool,
    pub max_connections: usize,
    pub min_connections: usize,
    pub connection_timeout_ms: u64,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_calls: u32,
    pub rate_limit_per_second: f64,
    pub cache_ttl_seconds: u64,
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            service_type: "default".to_string(),
            priority: 100,
            enabled: true,
            max_connections: 10,
            min_connections: 1,
            connection_timeout_ms: 5_000,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 2,
            rate_limit_per_second: 50.0,
            cache_ttl_seconds: 300,
        }
    }
}

impl ServerEndpoint {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}
