//! Storage Layer
//!
//! Dual-table persistence for collected tag samples:
//! - **Historical**: append-only log, one row per (device, tag, capture instant)
//! - **Realtime**: latest value per device+tag, keyed by `device_name + "_" + tag_name`
//!
//! # Components
//!
//! - [`StorageBackend`]: the engine contract (dual write + query side)
//! - [`SqliteBackend`] / [`PostgresBackend`]: the two engine implementations
//! - [`transfer`]: bulk migration and comparison between backends
//! - [`connect`]: engine selection from configuration at startup

use std::sync::Arc;

mod backend;
mod error;
mod postgres;
mod sqlite;
pub mod transfer;
mod types;

pub use backend::{StorageBackend, StorageEngine};
pub use error::StorageError;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
pub use types::{
    DEFAULT_QUERY_LIMIT, HistoricalQuery, HistoricalRecord, MAX_QUERY_LIMIT, RealtimeQuery,
    RealtimeRecord, SampleBatch, StorageStats, composite_key,
};

/// Connect to the configured engine, initialize its schema, and verify
/// connectivity.
pub async fn connect(
    engine: StorageEngine,
    dsn: &str,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match engine {
        StorageEngine::Sqlite => Arc::new(SqliteBackend::connect(dsn).await?),
        StorageEngine::Postgres => Arc::new(PostgresBackend::connect(dsn).await?),
    };

    backend.init_schema().await?;
    backend.ping().await?;
    tracing::info!(engine = %engine, "Storage backend connected");

    Ok(backend)
}
