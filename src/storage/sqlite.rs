//! SQLite storage backend (embedded file engine).
//!
//! Uses sqlx with WAL journal mode and `create_if_missing` so a fresh
//! install needs no setup beyond a writable directory. The realtime upsert
//! uses SQLite's `INSERT OR REPLACE`.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::storage::backend::StorageBackend;
use crate::storage::types::{
    HistoricalQuery, HistoricalRecord, RealtimeQuery, RealtimeRecord, StorageStats, composite_key,
    format_ts, parse_ts,
};
use crate::storage::StorageError;
use crate::value::{self, TagValue};

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection acquire timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Historical table DDL.
const HISTORICAL_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS tag_data_historical (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_name TEXT NOT NULL,
    tag_name    TEXT NOT NULL,
    tag_value   TEXT,
    timestamp   TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
"#;

/// Realtime table DDL. `id` is the composite `device_name + "_" + tag_name`.
const REALTIME_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS tag_data_realtime (
    id          TEXT PRIMARY KEY,
    device_name TEXT NOT NULL,
    tag_name    TEXT NOT NULL,
    tag_value   TEXT,
    timestamp   TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;

/// Index DDL for the common query shapes.
const INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_historical_device_tag_time
    ON tag_data_historical(device_name, tag_name, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_historical_timestamp
    ON tag_data_historical(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_historical_device_name
    ON tag_data_historical(device_name);
CREATE INDEX IF NOT EXISTS idx_realtime_device_name
    ON tag_data_realtime(device_name);
"#;

/// SQLite implementation of [`StorageBackend`].
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Connect to a SQLite database.
    ///
    /// `url` is a sqlx SQLite URL, e.g. `sqlite:data/tagflux.db`. The
    /// database file is created if missing.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(HISTORICAL_TABLE_DDL).execute(&self.pool).await?;
        sqlx::query(REALTIME_TABLE_DDL).execute(&self.pool).await?;
        for stmt in INDEX_DDL.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        tracing::debug!("SQLite schema initialized");
        Ok(())
    }

    async fn insert_historical(
        &self,
        device_name: &str,
        tags: &BTreeMap<String, TagValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let ts = format_ts(timestamp);
        let created_at = format_ts(Utc::now());

        let mut tx = self.pool.begin().await?;
        for (tag_name, tag_value) in tags {
            sqlx::query(
                "INSERT INTO tag_data_historical \
                 (device_name, tag_name, tag_value, timestamp, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(device_name)
            .bind(tag_name)
            .bind(value::encode(tag_value).to_string())
            .bind(&ts)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_realtime(
        &self,
        device_name: &str,
        tags: &BTreeMap<String, TagValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let ts = format_ts(timestamp);
        let updated_at = format_ts(Utc::now());

        let mut tx = self.pool.begin().await?;
        for (tag_name, tag_value) in tags {
            sqlx::query(
                "INSERT OR REPLACE INTO tag_data_realtime \
                 (id, device_name, tag_name, tag_value, timestamp, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(composite_key(device_name, tag_name))
            .bind(device_name)
            .bind(tag_name)
            .bind(value::encode(tag_value).to_string())
            .bind(&ts)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn historical(
        &self,
        query: &HistoricalQuery,
    ) -> Result<Vec<HistoricalRecord>, StorageError> {
        let mut sql = String::from(
            "SELECT id, device_name, tag_name, tag_value, timestamp, created_at \
             FROM tag_data_historical",
        );
        let mut conditions = Vec::new();
        if query.device_name.is_some() {
            conditions.push("device_name = ?");
        }
        if query.tag_name.is_some() {
            conditions.push("tag_name = ?");
        }
        if query.start.is_some() {
            conditions.push("timestamp >= ?");
        }
        if query.end.is_some() {
            conditions.push("timestamp <= ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, (i64, String, String, String, String, String)>(&sql);
        if let Some(ref device) = query.device_name {
            q = q.bind(device);
        }
        if let Some(ref tag) = query.tag_name {
            q = q.bind(tag);
        }
        if let Some(start) = query.start {
            q = q.bind(format_ts(start));
        }
        if let Some(end) = query.end {
            q = q.bind(format_ts(end));
        }
        let rows = q.bind(query.effective_limit()).fetch_all(&self.pool).await?;

        rows.into_iter().map(historical_record).collect()
    }

    async fn realtime(&self, query: &RealtimeQuery) -> Result<Vec<RealtimeRecord>, StorageError> {
        let mut sql = String::from(
            "SELECT id, device_name, tag_name, tag_value, timestamp, updated_at \
             FROM tag_data_realtime",
        );
        let mut conditions = Vec::new();
        if query.device_name.is_some() {
            conditions.push("device_name = ?");
        }
        if query.tag_name.is_some() {
            conditions.push("tag_name = ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY updated_at DESC");

        let mut q = sqlx::query_as::<_, (String, String, String, String, String, String)>(&sql);
        if let Some(ref device) = query.device_name {
            q = q.bind(device);
        }
        if let Some(ref tag) = query.tag_name {
            q = q.bind(tag);
        }
        let rows = q.fetch_all(&self.pool).await?;

        rows.into_iter().map(realtime_record).collect()
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let historical: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tag_data_historical")
            .fetch_one(&self.pool)
            .await?;
        let realtime: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tag_data_realtime")
            .fetch_one(&self.pool)
            .await?;

        Ok(StorageStats {
            historical_records: historical.max(0) as u64,
            realtime_records: realtime.max(0) as u64,
        })
    }

    async fn purge_historical(&self, days_to_keep: u32) -> Result<u64, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_to_keep));
        let result = sqlx::query("DELETE FROM tag_data_historical WHERE timestamp < ?")
            .bind(format_ts(cutoff))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        tracing::info!(deleted, days_to_keep, "Historical retention purge complete");
        Ok(deleted)
    }
}

fn historical_record(
    row: (i64, String, String, String, String, String),
) -> Result<HistoricalRecord, StorageError> {
    let (id, device_name, tag_name, tag_value, timestamp, created_at) = row;
    Ok(HistoricalRecord {
        id,
        device_name,
        tag_name,
        value: value::decode(serde_json::from_str(&tag_value)?),
        timestamp: parse_ts(&timestamp)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn realtime_record(
    row: (String, String, String, String, String, String),
) -> Result<RealtimeRecord, StorageError> {
    let (id, device_name, tag_name, tag_value, timestamp, updated_at) = row;
    Ok(RealtimeRecord {
        id,
        device_name,
        tag_name,
        value: value::decode(serde_json::from_str(&tag_value)?),
        timestamp: parse_ts(&timestamp)?,
        updated_at: parse_ts(&updated_at)?,
    })
}
