//! Core data types for the storage layer.
//!
//! - [`SampleBatch`]: all tags read from one device in one poll cycle
//! - [`HistoricalRecord`]: an immutable, append-only storage row
//! - [`RealtimeRecord`]: the mutable latest-value row per device+tag
//! - [`HistoricalQuery`] / [`RealtimeQuery`]: read-side filters
//! - [`StorageStats`]: per-table row counts

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::storage::StorageError;
use crate::value::TagValue;

/// Default result limit for historical queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Hard cap on query result size.
pub const MAX_QUERY_LIMIT: u32 = 10_000;

/// All tag values read from one device in one poll cycle.
///
/// Every tag in the batch shares the single `captured_at` instant; the tag
/// map is never empty (empty read cycles produce no batch at all).
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Name of the device the batch was read from.
    pub device_name: String,
    /// Capture instant shared by all tags in the batch.
    pub captured_at: DateTime<Utc>,
    /// Tag name to raw value.
    pub tags: BTreeMap<String, TagValue>,
}

impl SampleBatch {
    /// Create a batch captured at `captured_at`.
    pub fn new(
        device_name: impl Into<String>,
        captured_at: DateTime<Utc>,
        tags: BTreeMap<String, TagValue>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            captured_at,
            tags,
        }
    }

    /// Number of tags in the batch.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if the batch carries no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Composite identity of a realtime row: `device_name + "_" + tag_name`.
pub fn composite_key(device_name: &str, tag_name: &str) -> String {
    format!("{device_name}_{tag_name}")
}

/// One immutable historical row.
#[derive(Debug, Clone, Serialize)]
pub struct HistoricalRecord {
    pub id: i64,
    pub device_name: String,
    pub tag_name: String,
    pub value: TagValue,
    /// Capture instant of the originating batch.
    pub timestamp: DateTime<Utc>,
    /// Write instant, set by the backend at insert.
    pub created_at: DateTime<Utc>,
}

/// The latest-value row for one device+tag pair.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeRecord {
    /// Composite key, `device_name + "_" + tag_name`.
    pub id: String,
    pub device_name: String,
    pub tag_name: String,
    pub value: TagValue,
    /// Capture instant of the most recent written batch.
    pub timestamp: DateTime<Utc>,
    /// Write instant of the most recent upsert.
    pub updated_at: DateTime<Utc>,
}

/// Filters for historical queries.
///
/// Results are always reverse-chronological and capped at
/// [`MAX_QUERY_LIMIT`] rows.
#[derive(Debug, Clone, Default)]
pub struct HistoricalQuery {
    pub device_name: Option<String>,
    pub tag_name: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl HistoricalQuery {
    /// Effective limit after default and cap.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT)
    }
}

/// Filters for realtime snapshot queries.
#[derive(Debug, Clone, Default)]
pub struct RealtimeQuery {
    pub device_name: Option<String>,
    pub tag_name: Option<String>,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub historical_records: u64,
    pub realtime_records: u64,
}

/// Storage form of a timestamp: RFC 3339 with fixed microsecond precision.
///
/// The fixed fractional width keeps lexicographic string comparison in SQL
/// consistent with chronological order across both backends.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("bad timestamp '{raw}': {e}")))
}
