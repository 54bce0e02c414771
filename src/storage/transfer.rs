//! Bulk transfer and comparison between storage backends.
//!
//! Built only on the [`StorageBackend`] contract, so any engine pair works
//! in either direction. Historical rows are paged in fixed-size batches;
//! the realtime snapshot is small enough to move in one pass.

use std::collections::{BTreeMap, HashSet};

use crate::storage::backend::StorageBackend;
use crate::storage::types::{HistoricalQuery, RealtimeQuery, StorageStats};
use crate::storage::StorageError;

/// Rows fetched per page during historical transfer.
pub const TRANSFER_PAGE_SIZE: u32 = 1000;

/// Statistics-based comparison of two backends.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ComparisonReport {
    pub source: StorageStats,
    pub dest: StorageStats,
    pub historical_match: bool,
    pub realtime_match: bool,
}

impl ComparisonReport {
    /// True when both tables have matching record counts.
    pub fn matches(&self) -> bool {
        self.historical_match && self.realtime_match
    }
}

/// Copy every historical row from `source` to `dest`.
///
/// Pages newest-first through the source using the query contract's `end`
/// bound as a cursor. Because all tags of one poll cycle share a capture
/// timestamp, rows at the page boundary can share the cursor instant; the
/// boundary rows already copied are tracked by id and skipped on the next
/// page. Returns the number of rows copied.
pub async fn migrate_historical(
    source: &dyn StorageBackend,
    dest: &dyn StorageBackend,
) -> Result<u64, StorageError> {
    let mut copied: u64 = 0;
    let mut cursor = None;
    let mut boundary_ids: HashSet<i64> = HashSet::new();

    loop {
        let page = source
            .historical(&HistoricalQuery {
                end: cursor,
                limit: Some(TRANSFER_PAGE_SIZE),
                ..Default::default()
            })
            .await?;

        let fresh: Vec<_> = page
            .iter()
            .filter(|r| !boundary_ids.contains(&r.id))
            .collect();
        if fresh.is_empty() {
            if page.len() == TRANSFER_PAGE_SIZE as usize {
                // More rows share one instant than fit in a page; the
                // cursor cannot advance past them.
                tracing::warn!(
                    page_size = TRANSFER_PAGE_SIZE,
                    "Historical transfer stopped at an over-wide timestamp tie"
                );
            }
            break;
        }

        for record in &fresh {
            let mut tags = BTreeMap::new();
            tags.insert(record.tag_name.clone(), record.value.clone());
            dest.insert_historical(&record.device_name, &tags, record.timestamp)
                .await?;
            copied += 1;
        }

        if page.len() < TRANSFER_PAGE_SIZE as usize {
            break;
        }

        // Oldest row of a descending page defines the next cursor; rows
        // sharing that instant are remembered so the inclusive bound does
        // not duplicate them.
        let Some(oldest) = fresh.last().map(|r| r.timestamp) else {
            break;
        };
        boundary_ids = page
            .iter()
            .filter(|r| r.timestamp == oldest)
            .map(|r| r.id)
            .collect();
        cursor = Some(oldest);

        tracing::info!(copied, "Historical transfer in progress");
    }

    tracing::info!(copied, "Historical transfer complete");
    Ok(copied)
}

/// Copy the current realtime snapshot from `source` to `dest`.
///
/// Each row is re-submitted through the destination's realtime upsert with
/// its original capture timestamp. Returns the number of rows copied.
pub async fn migrate_realtime(
    source: &dyn StorageBackend,
    dest: &dyn StorageBackend,
) -> Result<u64, StorageError> {
    let rows = source.realtime(&RealtimeQuery::default()).await?;
    let mut copied: u64 = 0;

    for record in rows {
        let mut tags = BTreeMap::new();
        tags.insert(record.tag_name.clone(), record.value.clone());
        dest.upsert_realtime(&record.device_name, &tags, record.timestamp)
            .await?;
        copied += 1;
    }

    tracing::info!(copied, "Realtime transfer complete");
    Ok(copied)
}

/// Compare record counts between two backends.
pub async fn compare(
    source: &dyn StorageBackend,
    dest: &dyn StorageBackend,
) -> Result<ComparisonReport, StorageError> {
    let source_stats = source.stats().await?;
    let dest_stats = dest.stats().await?;

    let report = ComparisonReport {
        source: source_stats,
        dest: dest_stats,
        historical_match: source_stats.historical_records == dest_stats.historical_records,
        realtime_match: source_stats.realtime_records == dest_stats.realtime_records,
    };

    if report.matches() {
        tracing::info!("Backends have matching record counts");
    } else {
        tracing::warn!(
            source_historical = source_stats.historical_records,
            dest_historical = dest_stats.historical_records,
            source_realtime = source_stats.realtime_records,
            dest_realtime = dest_stats.realtime_records,
            "Backends have diverging record counts"
        );
    }

    Ok(report)
}
