//! tagflux - Industrial Tag Data Collector
//!
//! This crate continuously samples named values ("tags") from remote
//! industrial controllers on independent per-device schedules and persists
//! every sample twice: into an append-only historical table and a
//! latest-value realtime table, through a pluggable storage backend.
//!
//! # Architecture
//!
//! - **Device layer**: driver boundary trait, controller kinds, and the
//!   per-device session with reconnect/error-count policy
//! - **Collection pipeline**: one poll loop per device, a bounded sample
//!   queue, and a single storage writer applying the dual write
//! - **Storage**: the backend contract with SQLite and PostgreSQL engines,
//!   plus bulk transfer/compare tools between them
//! - **Status API**: JSON endpoints over the running pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagflux::{AppConfig, Collector, CollectorOptions, DriverRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("configs/config.yaml")?;
//!     let backend =
//!         tagflux::storage::connect(config.storage.engine, &config.storage.expanded_dsn())
//!             .await?;
//!
//!     let collector = Collector::new(
//!         config.devices.clone(),
//!         Arc::new(DriverRegistry::new()),
//!         Some(backend),
//!         CollectorOptions::default(),
//!     );
//!     collector.start().await?;
//!     Ok(())
//! }
//! ```

pub mod collect;
pub mod config;
pub mod device;
pub mod server;
pub mod storage;
pub mod value;

pub use collect::{Collector, CollectorError, CollectorOptions, CollectorState, SampleQueue};
pub use config::{AppConfig, ConfigError, DeviceConfig, TagSpec};
pub use device::{
    ControllerKind, DeviceDescriptor, DeviceSession, DeviceStatus, DriverError, DriverFamily,
    DriverRegistry, TagDriver,
};
pub use storage::{
    HistoricalQuery, HistoricalRecord, PostgresBackend, RealtimeQuery, RealtimeRecord,
    SampleBatch, SqliteBackend, StorageBackend, StorageEngine, StorageError, StorageStats,
};
pub use value::{TagValue, ValueKind, decode, encode};
