//! Storage backend contract and the dual-write semantics built on it.
//!
//! Every backend persists samples into two tables: an append-only
//! historical log and a latest-value realtime table keyed by
//! `device_name + "_" + tag_name`. [`StorageBackend::process_batch`] is a
//! best-effort dual write, not a transaction: on partial backend failure
//! one side may land without the other. That divergence is surfaced as a
//! `false` return and left to the operator-facing compare pass in
//! [`crate::storage::transfer`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::types::{
    HistoricalQuery, HistoricalRecord, RealtimeQuery, RealtimeRecord, SampleBatch, StorageStats,
};
use crate::storage::StorageError;
use crate::value::TagValue;

/// Supported storage engines, selected by configuration at startup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, EnumString, Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StorageEngine {
    /// Embedded file engine (SQLite).
    Sqlite,
    /// Cloud-hosted relational engine (PostgreSQL).
    Postgres,
}

/// Persistence contract shared by all storage engines.
///
/// Write-side operations are batch-granular: `insert_historical` appends
/// one row per tag all-or-nothing, `upsert_realtime` replaces the latest
/// value per composite key. The query side serves external viewers and the
/// transfer tools; it is not on the hot path.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Create tables and indexes if they do not exist. Idempotent.
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Append one historical row per tag, all sharing `timestamp`.
    ///
    /// The batch is atomic from the caller's point of view: either every
    /// tag lands or the call fails as a whole.
    async fn insert_historical(
        &self,
        device_name: &str,
        tags: &BTreeMap<String, TagValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Replace the realtime row for each `device + "_" + tag` key with the
    /// new value, `timestamp`, and a fresh write-time `updated_at`.
    async fn upsert_realtime(
        &self,
        device_name: &str,
        tags: &BTreeMap<String, TagValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Filtered historical query, reverse-chronological, limited.
    async fn historical(
        &self,
        query: &HistoricalQuery,
    ) -> Result<Vec<HistoricalRecord>, StorageError>;

    /// Current realtime snapshot, most recently updated first.
    async fn realtime(&self, query: &RealtimeQuery) -> Result<Vec<RealtimeRecord>, StorageError>;

    /// Row counts per table.
    async fn stats(&self) -> Result<StorageStats, StorageError>;

    /// Delete historical rows strictly older than `now - days_to_keep`
    /// days. Returns the number of deleted rows; a second run in
    /// succession deletes nothing.
    async fn purge_historical(&self, days_to_keep: u32) -> Result<u64, StorageError>;

    /// Dual-write one sample batch: historical append plus realtime
    /// upsert. Returns `true` only if both sides succeeded.
    ///
    /// Both writes are always attempted, so a historical failure does not
    /// suppress the realtime update (and vice versa); each side's error is
    /// logged where it occurs.
    async fn process_batch(&self, batch: &SampleBatch) -> bool {
        let historical = self
            .insert_historical(&batch.device_name, &batch.tags, batch.captured_at)
            .await;
        if let Err(e) = &historical {
            tracing::error!(device = %batch.device_name, error = %e, "Historical insert failed");
        }

        let realtime = self
            .upsert_realtime(&batch.device_name, &batch.tags, batch.captured_at)
            .await;
        if let Err(e) = &realtime {
            tracing::error!(device = %batch.device_name, error = %e, "Realtime upsert failed");
        }

        historical.is_ok() && realtime.is_ok()
    }

    /// Apply [`Self::process_batch`] to each batch in order; returns the
    /// number of fully successful batches.
    async fn batch_process(&self, batches: &[SampleBatch]) -> usize {
        let mut succeeded = 0;
        for batch in batches {
            if self.process_batch(batch).await {
                succeeded += 1;
            }
        }
        succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend stub whose write sides fail per device name, for exercising
    /// the dual-write accounting.
    #[derive(Default)]
    struct FlakyBackend {
        historical_writes: AtomicUsize,
        realtime_writes: AtomicUsize,
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn init_schema(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn insert_historical(
            &self,
            device_name: &str,
            _tags: &BTreeMap<String, TagValue>,
            _timestamp: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            if device_name == "bad-historical" {
                return Err(StorageError::Internal("historical down".to_string()));
            }
            self.historical_writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn upsert_realtime(
            &self,
            device_name: &str,
            _tags: &BTreeMap<String, TagValue>,
            _timestamp: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            if device_name == "bad-realtime" {
                return Err(StorageError::Internal("realtime down".to_string()));
            }
            self.realtime_writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn historical(
            &self,
            _query: &HistoricalQuery,
        ) -> Result<Vec<HistoricalRecord>, StorageError> {
            Ok(Vec::new())
        }

        async fn realtime(
            &self,
            _query: &RealtimeQuery,
        ) -> Result<Vec<RealtimeRecord>, StorageError> {
            Ok(Vec::new())
        }

        async fn stats(&self) -> Result<StorageStats, StorageError> {
            Ok(StorageStats {
                historical_records: 0,
                realtime_records: 0,
            })
        }

        async fn purge_historical(&self, _days_to_keep: u32) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    fn batch(device: &str) -> SampleBatch {
        let mut tags = BTreeMap::new();
        tags.insert("Speed".to_string(), TagValue::Float(1.0));
        SampleBatch::new(device, Utc::now(), tags)
    }

    #[tokio::test]
    async fn test_process_batch_requires_both_sides() {
        let backend = FlakyBackend::default();

        assert!(backend.process_batch(&batch("Line1")).await);
        assert!(!backend.process_batch(&batch("bad-historical")).await);
        assert!(!backend.process_batch(&batch("bad-realtime")).await);

        // Both sides are always attempted: a historical failure did not
        // suppress the realtime upsert, and vice versa.
        assert_eq!(backend.historical_writes.load(Ordering::Relaxed), 2);
        assert_eq!(backend.realtime_writes.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_batch_process_counts_only_full_successes() {
        let backend = FlakyBackend::default();
        let batches = vec![batch("Line1"), batch("bad-historical"), batch("Line2")];

        assert_eq!(backend.batch_process(&batches).await, 2);
    }

    #[test]
    fn test_storage_engine_from_str() {
        assert_eq!(
            StorageEngine::from_str("sqlite").unwrap(),
            StorageEngine::Sqlite
        );
        assert_eq!(
            StorageEngine::from_str("Postgres").unwrap(),
            StorageEngine::Postgres
        );
        assert!(StorageEngine::from_str("oracle").is_err());
    }

    #[test]
    fn test_storage_engine_as_str() {
        assert_eq!(StorageEngine::Sqlite.as_ref(), "sqlite");
        assert_eq!(StorageEngine::Postgres.as_ref(), "postgres");
    }
}
