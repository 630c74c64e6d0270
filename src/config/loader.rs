//! Configuration loading
//!
//! TOML file plus `TOOLGATE_` environment overrides, validated before use.

use crate::config::validation::validate_config;
use crate::config::Config;
use crate::utils::errors::{ToolGateError, ToolGateResult};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::path::Path;

/// Load and validate configuration from a TOML file, applying environment
/// overrides (e.g. `TOOLGATE_GLOBAL__FAILOVER_ENABLED=false`).
pub fn load_config(path: impl AsRef<Path>) -> ToolGateResult<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ToolGateError::Config(format!(
            "config file does not exist: {}",
            path.display()
        )));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("TOOLGATE_").split("__"))
        .extract()
        .map_err(|e| ToolGateError::Config(e.to_string()))?;

    validated(config)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> ToolGateResult<Config> {
    let config: Config =
        toml::from_str(content).map_err(|e| ToolGateError::Config(e.to_string()))?;
    validated(config)
}

fn validated(config: Config) -> ToolGateResult<Config> {
    validate_config(&config).map_err(|errors| {
        let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        ToolGateError::Config(details.join("; "))
    })?;
    Ok(config)
}
