//! Configuration module.
//!
//! YAML-based configuration loading and validation for:
//! - Status API server settings (bind address, port)
//! - Storage backend selection and pipeline tuning
//! - Managed devices and their tag lists

mod app;
mod device;
mod validation;

pub use app::{AppConfig, ServerConfig, StorageConfig};
pub use device::{DEFAULT_SCAN_RATE, DeviceConfig, TagSpec};
pub use validation::{ConfigError, expand_env_vars};
