//! Storage writer loop.
//!
//! A single task drains the collection queue and applies the dual write to
//! the active storage backend, decoupled from every poll cadence. Between
//! drains it sleeps a short interval to avoid busy-spinning on an empty
//! queue; when a drain cycle fails (any batch not fully written) it backs
//! off longer before the next drain.
//!
//! Batches still in the queue are never discarded while the process runs;
//! batches whose dual write failed are not individually requeued, and
//! nothing survives a process restart (at-least-once within one process
//! lifetime only).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collect::queue::SampleQueue;
use crate::storage::StorageBackend;

/// Default sleep between drain cycles.
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_millis(100);

/// Default backoff after a failed drain cycle.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Spawn the storage writer loop.
pub(crate) fn spawn_writer(
    queue: Arc<SampleQueue>,
    backend: Arc<dyn StorageBackend>,
    write_interval: Duration,
    error_backoff: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Storage writer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batches = queue.drain();
            let mut sleep_for = write_interval;

            if !batches.is_empty() {
                let total = batches.len();
                let succeeded = backend.batch_process(&batches).await;

                if succeeded == total {
                    tracing::debug!(batches = total, "Drain cycle stored");
                } else {
                    tracing::error!(
                        failed = total - succeeded,
                        total,
                        "Drain cycle had failed batches, backing off"
                    );
                    sleep_for = error_backoff;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        // Leftover batches at shutdown are an accepted loss window.
        let unflushed = queue.len();
        if unflushed > 0 {
            tracing::warn!(unflushed, "Storage writer stopping with undelivered batches");
        }
        tracing::info!("Storage writer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HistoricalQuery, SampleBatch, SqliteBackend, StorageBackend};
    use crate::value::TagValue;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    async fn open_backend(dir: &tempfile::TempDir) -> Arc<SqliteBackend> {
        let path = dir.path().join("writer.db");
        let backend = SqliteBackend::connect(&format!("sqlite:{}", path.display()))
            .await
            .unwrap();
        backend.init_schema().await.unwrap();
        Arc::new(backend)
    }

    fn batch(device: &str, v: f64) -> SampleBatch {
        let mut tags = BTreeMap::new();
        tags.insert("Speed".to_string(), TagValue::Float(v));
        SampleBatch::new(device, Utc::now(), tags)
    }

    #[tokio::test]
    async fn test_writer_drains_queue() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir).await;
        let queue = Arc::new(SampleQueue::default());
        let cancel = CancellationToken::new();

        queue.push(batch("Line1", 1.0));
        queue.push(batch("Line1", 2.0));

        let writer_backend: Arc<dyn StorageBackend> = backend.clone();
        let handle = spawn_writer(
            Arc::clone(&queue),
            writer_backend,
            Duration::from_millis(10),
            Duration::from_millis(50),
            cancel.clone(),
        );

        // Let it run a few cycles, enqueueing while it drains
        tokio::time::sleep(Duration::from_millis(40)).await;
        queue.push(batch("Line1", 3.0));
        tokio::time::sleep(Duration::from_millis(60)).await;

        cancel.cancel();
        handle.await.unwrap();

        assert!(queue.is_empty());
        let rows = backend.historical(&HistoricalQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_writer_stops_promptly_when_cancelled() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir).await;
        let queue = Arc::new(SampleQueue::default());
        let cancel = CancellationToken::new();

        let writer_backend: Arc<dyn StorageBackend> = backend;
        let handle = spawn_writer(
            Arc::clone(&queue),
            writer_backend,
            Duration::from_secs(60),
            Duration::from_secs(60),
            cancel.clone(),
        );

        // Cancellation must interrupt the long idle sleep
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("writer did not stop in time")
            .unwrap();
    }
}
