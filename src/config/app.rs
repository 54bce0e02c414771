//! Application configuration structures.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::StorageEngine;

use super::device::DeviceConfig;
use super::validation::{ConfigError, expand_env_vars};

/// Default collection queue capacity in batches.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default storage writer drain interval.
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_millis(100);

/// Default storage writer error backoff.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

fn default_engine() -> StorageEngine {
    StorageEngine::Sqlite
}

fn default_dsn() -> String {
    "sqlite:tagflux.db".to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_write_interval() -> Duration {
    DEFAULT_WRITE_INTERVAL
}

fn default_error_backoff() -> Duration {
    DEFAULT_ERROR_BACKOFF
}

/// Status API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage engine (default: sqlite).
    #[serde(default = "default_engine")]
    pub engine: StorageEngine,

    /// Connection string: a SQLite path URL or a PostgreSQL DSN.
    /// `${VAR}` / `${VAR:-default}` references are expanded from the
    /// environment.
    #[serde(default = "default_dsn")]
    pub dsn: String,

    /// Collection queue capacity in batches (default: 10000).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Storage writer drain interval (default: "100ms").
    #[serde(default = "default_write_interval", with = "humantime_serde")]
    pub write_interval: Duration,

    /// Storage writer backoff after a failed drain cycle (default: "1s").
    #[serde(default = "default_error_backoff", with = "humantime_serde")]
    pub error_backoff: Duration,

    /// Days of historical data to keep; unset disables the periodic purge.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            dsn: default_dsn(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_interval: DEFAULT_WRITE_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            retention_days: None,
        }
    }
}

impl StorageConfig {
    /// DSN with environment references expanded.
    pub fn expanded_dsn(&self) -> String {
        expand_env_vars(&self.dsn)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Status API server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend selection and pipeline tuning.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Managed devices with their tag lists.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.storage.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "storage queue_capacity must be positive".to_string(),
            ));
        }
        if self.storage.dsn.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage dsn cannot be empty".to_string(),
            ));
        }

        let mut seen_names = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !seen_names.insert(&device.name) {
                return Err(ConfigError::Validation(format!(
                    "duplicate device name: '{}'",
                    device.name
                )));
            }
        }

        Ok(())
    }
}
