//! Configuration for the drover master.
//!
//! Supports YAML file and environment variable overrides.

use serde::Deserialize;
use std::path::Path;

/// Default frontend (producer-facing) port.
pub const DEFAULT_FRONTEND_PORT: u16 = 5559;
/// Default backend (worker-facing) port.
pub const DEFAULT_BACKEND_PORT: u16 = 5560;
/// Default monitoring (publish/subscribe) port.
pub const DEFAULT_MONITORING_PORT: u16 = 5561;

/// Master node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host the broker binds on.
    pub host: String,
    /// Port producers connect to.
    pub frontend_port: u16,
    /// Port workers connect to.
    pub backend_port: u16,
    /// Port monitoring subscribers connect to.
    pub monitoring_port: u16,
    /// Log level used when `DROVER_LOG` is not set.
    pub log_level: String,
    /// Durable cache configuration.
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            frontend_port: DEFAULT_FRONTEND_PORT,
            backend_port: DEFAULT_BACKEND_PORT,
            monitoring_port: DEFAULT_MONITORING_PORT,
            log_level: "info".to_string(),
            cache: CacheConfig::default(),
        }
    }
}

/// Durable cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Path to the cache store file.
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: "./data/master_cache".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from file
        let config_path =
            std::env::var("DROVER_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        // Override with environment variables
        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DROVER_HOST") {
            self.host = host;
        }

        if let Ok(port) = std::env::var("DROVER_FRONTEND_PORT") {
            if let Ok(p) = port.parse() {
                self.frontend_port = p;
            }
        }

        if let Ok(port) = std::env::var("DROVER_BACKEND_PORT") {
            if let Ok(p) = port.parse() {
                self.backend_port = p;
            }
        }

        if let Ok(port) = std::env::var("DROVER_MONITORING_PORT") {
            if let Ok(p) = port.parse() {
                self.monitoring_port = p;
            }
        }

        if let Ok(path) = std::env::var("DROVER_CACHE_PATH") {
            self.cache.path = path;
        }

        if let Ok(level) = std::env::var("DROVER_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Frontend bind address as `host:port`.
    pub fn frontend_addr(&self) -> String {
        format!("{}:{}", self.host, self.frontend_port)
    }

    /// Backend bind address as `host:port`.
    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.host, self.backend_port)
    }

    /// Monitoring bind address as `host:port`.
    pub fn monitoring_addr(&self) -> String {
        format!("{}:{}", self.host, self.monitoring_port)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.frontend_port, 5559);
        assert_eq!(config.backend_port, 5560);
        assert_eq!(config.monitoring_port, 5561);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.cache.path, "./data/master_cache");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
host: 0.0.0.0
frontend_port: 7559
backend_port: 7560
monitoring_port: 7561
log_level: debug

cache:
  path: /tmp/drover_cache
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.frontend_port, 7559);
        assert_eq!(config.backend_port, 7560);
        assert_eq!(config.monitoring_port, 7561);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.cache.path, "/tmp/drover_cache");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "frontend_port: 9000\n";

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.frontend_port, 9000);
        assert_eq!(config.backend_port, DEFAULT_BACKEND_PORT);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_addr_helpers() {
        let config = Config::default();
        assert_eq!(config.frontend_addr(), "127.0.0.1:5559");
        assert_eq!(config.backend_addr(), "127.0.0.1:5560");
        assert_eq!(config.monitoring_addr(), "127.0.0.1:5561");
    }
}
