//! Fail-fast validation of server endpoint specs
//!
//! A malformed spec is a caller bug and is rejected at registration or config
//! load, never at invoke time.

use crate::config::{Config, ServerEndpoint};
use std::collections::HashSet;

/// Validation error with the field path that failed
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a single endpoint spec.
pub fn validate_endpoint(endpoint: &ServerEndpoint) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_endpoint(endpoint, "server", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a full configuration, including cross-endpoint checks.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    for (idx, server) in config.servers.iter().enumerate() {
        let path = format!("servers[{}]", idx);

        if !server.name.is_empty() && !names.insert(server.name.clone()) {
            errors.push(ValidationError {
                path: format!("{}.name", path),
                message: format!("duplicate server name: {}", server.name),
            });
        }

        check_endpoint(server, &path, &mut errors);
    }

    if config.global.health_check_interval_ms == 0 {
        errors.push(ValidationError {
            path: "global.health_check_interval_ms".to_string(),
            message: "health check interval must be greater than 0".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_endpoint(server: &ServerEndpoint, path: &str, errors: &mut Vec<ValidationError>) {
    if server.name.is_empty() {
        errors.push(ValidationError {
            path: format!("{}.name", path),
            message: "server name cannot be empty".to_string(),
        });
    }

    if !has_known_scheme(&server.address) {
        errors.push(ValidationError {
            path: format!("{}.address", path),
            message: format!(
                "address '{}' must start with stdio:, http://, https:// or tcp://",
                server.address
            ),
        });
    }

    if server.service_type.is_empty() {
        errors.push(ValidationError {
            path: format!("{}.service_type", path),
            message: "service_type cannot be empty".to_string(),
        });
    }

    if server.max_connections == 0 {
        errors.push(ValidationError {
            path: format!("{}.max_connections", path),
            message: "max_connections must be greater than 0".to_string(),
        });
    }

    if server.min_connections > server.max_connections {
        errors.push(ValidationError {
            path: format!("{}.min_connections", path),
            message: format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                server.min_connections, server.max_connections
            ),
        });
    }

    if server.failure_threshold == 0 {
        errors.push(ValidationError {
            path: format!("{}.failure_threshold", path),
            message: "failure_threshold must be greater than 0".to_string(),
        });
    }

    if server.half_open_max_calls == 0 {
        errors.push(ValidationError {
            path: format!("{}.half_open_max_calls", path),
            message: "half_open_max_calls must be greater than 0".to_string(),
        });
    }

    if server.rate_limit_per_second <= 0.0 {
        errors.push(ValidationError {
            path: format!("{}.rate_limit_per_second", path),
            message: "rate_limit_per_second must be greater than 0".to_string(),
        });
    }
}

fn has_known_scheme(address: &str) -> bool {
    address.starts_with("stdio:")
        || address.starts_with("http://")
        || address.starts_with("https://")
        || address.starts_with("tcp://")
}
