//! Collection queue between poll loops and the storage writer.
//!
//! A bounded, thread-safe FIFO of sample batches. Producers (one poll loop
//! per device) push; the single storage writer pops one batch or drains
//! everything currently queued in one atomic step. When the writer falls
//! behind and the queue hits capacity, the oldest batch is dropped with a
//! warning so poll loops never block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::storage::SampleBatch;

/// Default maximum number of queued batches.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Bounded FIFO of sample batches.
#[derive(Debug)]
pub struct SampleQueue {
    inner: Mutex<VecDeque<SampleBatch>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl SampleQueue {
    /// Create a queue holding at most `capacity` batches.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<SampleBatch>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a batch, dropping the oldest queued batch on overflow.
    pub fn push(&self, batch: SampleBatch) {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            if let Some(oldest) = queue.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    device = %oldest.device_name,
                    capacity = self.capacity,
                    "Collection queue full, dropping oldest batch"
                );
            }
        }
        queue.push_back(batch);
    }

    /// Remove and return the oldest batch, if any. Never blocks.
    pub fn pop(&self) -> Option<SampleBatch> {
        self.lock().pop_front()
    }

    /// Remove and return every currently queued batch in FIFO order.
    ///
    /// Atomic with respect to producers: no batch is double-delivered or
    /// lost between this call and a concurrent push.
    pub fn drain(&self) -> Vec<SampleBatch> {
        self.lock().drain(..).collect()
    }

    /// Number of currently queued batches.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total batches dropped to backpressure since creation.
    pub fn dropped_batches(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
