//! Collection pipeline: poll loops, queue, storage writer, orchestrator.
//!
//! Data flow: per-device poll loops produce sample batches into the
//! [`SampleQueue`]; the single storage writer drains it and applies the
//! dual write through the active backend. The [`Collector`] owns task
//! lifecycle and exposes status snapshots.

mod orchestrator;
mod queue;
mod scheduler;
mod writer;

pub use orchestrator::{
    Collector, CollectorError, CollectorOptions, CollectorState, STOP_TIMEOUT,
};
pub use queue::{DEFAULT_QUEUE_CAPACITY, SampleQueue};
pub use scheduler::{MIN_SCAN_INTERVAL, clamp_scan_interval};
pub use writer::{DEFAULT_ERROR_BACKOFF, DEFAULT_WRITE_INTERVAL};
