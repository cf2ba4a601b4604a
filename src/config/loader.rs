//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    // Check if file exists
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    // Read file contents
    let contents = std::fs::read_to_string(path)?;

    // Parse JSON
    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    // Validate configuration
    config.validate()?;

    info!(
        "Configuration loaded: listen={} pollers={} workers={} max_connections={}",
        config.listen.address,
        config.poller.count,
        config.worker.count,
        config.connection.max_connections
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `CONDUIT_LISTEN_ADDR`: Override listen address
/// - `CONDUIT_LOG_LEVEL`: Override log level
/// - `CONDUIT_MAX_CONNECTIONS`: Override max connections
/// - `CONDUIT_POLLER_COUNT`: Override poller thread count
/// - `CONDUIT_WORKER_COUNT`: Override worker thread count
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    // Override listen address
    if let Ok(addr) = std::env::var("CONDUIT_LISTEN_ADDR") {
        config.listen.address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "CONDUIT_LISTEN_ADDR".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    // Override log level
    if let Ok(level) = std::env::var("CONDUIT_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    // Override max connections
    if let Ok(max) = std::env::var("CONDUIT_MAX_CONNECTIONS") {
        config.connection.max_connections = max.parse().map_err(|_| ConfigError::EnvError {
            name: "CONDUIT_MAX_CONNECTIONS".into(),
            reason: format!("Invalid number: {max}"),
        })?;
        debug!(
            "Max connections overridden to {}",
            config.connection.max_connections
        );
    }

    // Override poller count
    if let Ok(count) = std::env::var("CONDUIT_POLLER_COUNT") {
        config.poller.count = count.parse().map_err(|_| ConfigError::EnvError {
            name: "CONDUIT_POLLER_COUNT".into(),
            reason: format!("Invalid number: {count}"),
        })?;
        debug!("Poller count overridden to {}", config.poller.count);
    }

    // Override worker count
    if let Ok(count) = std::env::var("CONDUIT_WORKER_COUNT") {
        config.worker.count = count.parse().map_err(|_| ConfigError::EnvError {
            name: "CONDUIT_WORKER_COUNT".into(),
            reason: format!("Invalid number: {count}"),
        })?;
        debug!("Worker count overridden to {}", config.worker.count);
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
