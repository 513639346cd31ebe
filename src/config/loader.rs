//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::TrackerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming the cluster configuration endpoint host.
pub const ENV_ENDPOINT_HOST: &str = "ElastiCacheEndpoint";
/// Environment variable naming the cluster configuration endpoint port.
pub const ENV_ENDPOINT_PORT: &str = "ElastiCacheEndpointPort";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides from the process environment, then validate.
pub fn load_config(path: Option<&Path>) -> Result<TrackerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => TrackerConfig::default(),
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the cache endpoint overrides using the given variable lookup.
pub fn apply_env_overrides<F>(config: &mut TrackerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(ENV_ENDPOINT_HOST).filter(|h| !h.trim().is_empty()) {
        config.cache.endpoint_host = host.trim().to_string();
    }

    if let Some(port) = lookup(ENV_ENDPOINT_PORT) {
        config.cache.endpoint_port = port.trim().parse().map_err(|_| ConfigError::Env {
            var: ENV_ENDPOINT_PORT,
            value: port.clone(),
        })?;
    }

    Ok(())
}
