//! Configuration file parsing
//!
//! Parses TOML configuration files for the cache server, with a
//! flag-resolved constructor for running without one. All values are fixed
//! before the server starts and never re-read at runtime.

use crate::protocol;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Network settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend selection
    pub storage: StorageConfig,
}

/// Network settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP port serving cache requests
    #[serde(default = "default_data_port")]
    pub data_port: u16,

    /// UDP port listening for discovery broadcasts
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,

    /// UDP port on the requester side that discovery replies go to
    #[serde(default = "default_info_port")]
    pub info_port: u16,

    /// Answer discovery broadcasts
    #[serde(default = "default_broadcast")]
    pub broadcast: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_port: default_data_port(),
            broadcast_port: default_broadcast_port(),
            info_port: default_info_port(),
            broadcast: default_broadcast(),
            log_level: default_log_level(),
        }
    }
}

fn default_data_port() -> u16 {
    protocol::DATA_PORT
}

fn default_broadcast_port() -> u16 {
    protocol::BROADCAST_PORT
}

fn default_info_port() -> u16 {
    protocol::INFO_PORT
}

fn default_broadcast() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend selection
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend driver
    pub driver: Driver,

    /// Source specifier: file path for the kv and sqlite drivers
    #[serde(default)]
    pub source: String,

    /// Access the relational database from multiple threads without a lock
    #[serde(default)]
    pub lockless: bool,
}

/// Backend driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// In-memory map, contents lost on exit
    Ram,
    /// Embedded ordered key-value file
    Kv,
    /// Relational database file
    Sqlite,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from already-resolved flag values.
    pub fn from_flags(driver: Driver, source: &str, lockless: bool, broadcast: bool) -> Self {
        Self {
            server: ServerConfig {
                broadcast,
                ..ServerConfig::default()
            },
            storage: StorageConfig {
                driver,
                source: source.to_string(),
                lockless,
            },
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.driver != Driver::Ram && self.storage.source.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "driver {:?} requires a source path",
                self.storage.driver
            )));
        }

        // The two listening ports must not collide (0 picks ephemeral ports
        // and never collides).
        if self.server.data_port != 0 && self.server.data_port == self.server.broadcast_port {
            return Err(ConfigError::Invalid(format!(
                "data and broadcast ports collide: {}",
                self.server.data_port
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::parse(
            r#"
[storage]
driver = "ram"
"#,
        )
        .unwrap();

        assert_eq!(config.storage.driver, Driver::Ram);
        assert_eq!(config.server.data_port, protocol::DATA_PORT);
        assert_eq!(config.server.broadcast_port, protocol::BROADCAST_PORT);
        assert!(config.server.broadcast);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
[server]
data_port = 4100
broadcast_port = 4101
info_port = 4102
broadcast = false
log_level = "debug"

[storage]
driver = "sqlite"
source = "/var/cache/server.db"
lockless = true
"#,
        )
        .unwrap();

        assert_eq!(config.server.data_port, 4100);
        assert_eq!(config.server.log_level, "debug");
        assert!(!config.server.broadcast);
        assert_eq!(config.storage.driver, Driver::Sqlite);
        assert!(config.storage.lockless);
    }

    #[test]
    fn test_missing_source_error() {
        let result = Config::parse(
            r#"
[storage]
driver = "kv"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_port_collision_error() {
        let result = Config::parse(
            r#"
[server]
data_port = 5000
broadcast_port = 5000

[storage]
driver = "ram"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_driver_error() {
        let result = Config::parse(
            r#"
[storage]
driver = "postgres"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_flags() {
        let config = Config::from_flags(Driver::Kv, "cache.sled", false, true);
        assert_eq!(config.storage.driver, Driver::Kv);
        assert_eq!(config.storage.source, "cache.sled");
        assert_eq!(config.server.data_port, protocol::DATA_PORT);
    }
}
