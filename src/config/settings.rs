//! # Configuration Settings
//!
//! Process-level settings read from environment variables. Everything else —
//! bind address, filters, code repository — lives in the remote global
//! configuration document fetched at startup (see `configstore`).

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Process configuration sourced from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// Base URL of the configuration repository serving the JSON file tree.
    #[validate(url(message = "Config repository URL must be a valid URL"))]
    pub config_repository_url: String,

    /// Log level used until the remote global configuration is loaded.
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub startup_log_level: String,

    /// Emit JSON-structured log lines.
    pub json_logging: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_repository_url: "http://127.0.0.1:9000".to_string(),
            startup_log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            config_repository_url: std::env::var("PORTICO_CONFIG_REPOSITORY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            startup_log_level: std::env::var("PORTICO_LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string()),
            json_logging: std::env::var("PORTICO_JSON_LOGGING")
                .map(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1")
                .unwrap_or(false),
        };
        config
            .validate()
            .map_err(|e| Error::configuration(format!("Invalid process configuration: {}", e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serialize tests that touch process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::remove_var("PORTICO_CONFIG_REPOSITORY_URL");
        env::remove_var("PORTICO_LOG_LEVEL");
        env::remove_var("PORTICO_JSON_LOGGING");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.config_repository_url, "http://127.0.0.1:9000");
        assert_eq!(config.startup_log_level, "info");
        assert!(!config.json_logging);
    }

    #[test]
    fn test_from_env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("PORTICO_CONFIG_REPOSITORY_URL", "http://config.internal:8443");
        env::set_var("PORTICO_LOG_LEVEL", "debug");
        env::set_var("PORTICO_JSON_LOGGING", "true");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.config_repository_url, "http://config.internal:8443");
        assert_eq!(config.startup_log_level, "debug");
        assert!(config.json_logging);

        env::remove_var("PORTICO_CONFIG_REPOSITORY_URL");
        env::remove_var("PORTICO_LOG_LEVEL");
        env::remove_var("PORTICO_JSON_LOGGING");
    }

    #[test]
    fn test_invalid_repository_url_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("PORTICO_CONFIG_REPOSITORY_URL", "not a url");
        let result = AppConfig::from_env();
        env::remove_var("PORTICO_CONFIG_REPOSITORY_URL");
        assert!(result.is_err());
    }
}
