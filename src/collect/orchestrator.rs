//! Collector orchestrator: lifecycle of the whole pipeline.
//!
//! Owns the poll loops and the storage writer. `start` launches one loop
//! per configured device plus the writer; `stop` cancels the shared token
//! and waits briefly for tasks to observe it. Sample batches still queued
//! at stop are left undelivered, an accepted loss window at shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collect::queue::{DEFAULT_QUEUE_CAPACITY, SampleQueue};
use crate::collect::scheduler::spawn_poll_loop;
use crate::collect::writer::{DEFAULT_ERROR_BACKOFF, DEFAULT_WRITE_INTERVAL, spawn_writer};
use crate::config::DeviceConfig;
use crate::device::{DeviceSession, DeviceStatus, DriverRegistry, SessionState};
use crate::storage::StorageBackend;

/// How long `stop` waits for each task group to observe cancellation.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// `start` was called without a configured storage backend.
    #[error("no storage backend configured")]
    NoStorageBackend,
}

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CollectorState {
    /// Nothing running.
    Idle,
    /// Poll loops and storage writer active.
    Running,
    /// Terminal: process termination in progress.
    ShuttingDown,
}

/// Tuning knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Collection queue capacity in batches.
    pub queue_capacity: usize,
    /// Storage writer sleep between drain cycles.
    pub write_interval: Duration,
    /// Storage writer backoff after a failed drain cycle.
    pub error_backoff: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_interval: DEFAULT_WRITE_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

struct RunState {
    state: CollectorState,
    cancel: Option<CancellationToken>,
    poll_handles: Vec<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
    /// Device name to shared session state, kept across stop for status.
    sessions: BTreeMap<String, Arc<SessionState>>,
}

/// Orchestrates poll loops and the storage writer.
pub struct Collector {
    devices: Vec<DeviceConfig>,
    registry: Arc<DriverRegistry>,
    backend: Option<Arc<dyn StorageBackend>>,
    queue: Arc<SampleQueue>,
    options: CollectorOptions,
    run: tokio::sync::Mutex<RunState>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Create an orchestrator over the given devices and backend.
    pub fn new(
        devices: Vec<DeviceConfig>,
        registry: Arc<DriverRegistry>,
        backend: Option<Arc<dyn StorageBackend>>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            devices,
            registry,
            backend,
            queue: Arc::new(SampleQueue::new(options.queue_capacity)),
            options,
            run: tokio::sync::Mutex::new(RunState {
                state: CollectorState::Idle,
                cancel: None,
                poll_handles: Vec::new(),
                writer_handle: None,
                sessions: BTreeMap::new(),
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CollectorState {
        self.run.lock().await.state
    }

    /// Per-device status snapshots, served without touching the loops.
    pub async fn status(&self) -> BTreeMap<String, DeviceStatus> {
        let run = self.run.lock().await;
        run.sessions
            .iter()
            .map(|(name, state)| (name.clone(), state.snapshot()))
            .collect()
    }

    /// Batches currently waiting for the storage writer.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Batches dropped to queue backpressure since creation.
    pub fn dropped_batches(&self) -> u64 {
        self.queue.dropped_batches()
    }

    /// Launch the pipeline: one poll loop per device with tags, plus the
    /// storage writer.
    ///
    /// A no-op when already running. Fails without any state change when
    /// no storage backend is configured. Devices without configured tags
    /// are skipped with a warning, never failing the rest.
    pub async fn start(&self) -> Result<(), CollectorError> {
        let mut run = self.run.lock().await;
        match run.state {
            CollectorState::Running => {
                tracing::warn!("Collection already running");
                return Ok(());
            }
            CollectorState::ShuttingDown => {
                tracing::warn!("Collector is shutting down, ignoring start");
                return Ok(());
            }
            CollectorState::Idle => {}
        }

        let backend = self
            .backend
            .as_ref()
            .ok_or(CollectorError::NoStorageBackend)?;

        let cancel = CancellationToken::new();
        run.sessions.clear();
        run.poll_handles.clear();

        for device in &self.devices {
            let tag_names = device.tag_names();
            if tag_names.is_empty() {
                tracing::warn!(device = %device.name, "No tags configured, skipping device");
                continue;
            }

            let session = DeviceSession::new(device.descriptor(), Arc::clone(&self.registry));
            run.sessions
                .insert(device.name.clone(), session.state_handle());
            run.poll_handles.push(spawn_poll_loop(
                session,
                tag_names,
                device.scan_interval(),
                Arc::clone(&self.queue),
                cancel.clone(),
            ));
        }

        run.writer_handle = Some(spawn_writer(
            Arc::clone(&self.queue),
            Arc::clone(backend),
            self.options.write_interval,
            self.options.error_backoff,
            cancel.clone(),
        ));

        run.cancel = Some(cancel);
        run.state = CollectorState::Running;
        tracing::info!(
            devices = run.poll_handles.len(),
            "Collection started"
        );
        Ok(())
    }

    /// Stop the pipeline and return to `Idle`.
    pub async fn stop(&self) {
        self.halt(CollectorState::Idle).await;
    }

    /// Stop the pipeline and enter the terminal `ShuttingDown` state.
    pub async fn shutdown(&self) {
        self.halt(CollectorState::ShuttingDown).await;
    }

    async fn halt(&self, final_state: CollectorState) {
        let mut run = self.run.lock().await;
        if run.state != CollectorState::Running {
            // ShuttingDown is terminal; a plain stop never leaves it.
            if final_state == CollectorState::ShuttingDown {
                run.state = final_state;
            }
            return;
        }

        tracing::info!("Stopping collection");
        if let Some(cancel) = run.cancel.take() {
            cancel.cancel();
        }

        if let Some(writer) = run.writer_handle.take() {
            if tokio::time::timeout(STOP_TIMEOUT, writer).await.is_err() {
                tracing::warn!("Storage writer did not stop within {STOP_TIMEOUT:?}");
            }
        }

        for handle in run.poll_handles.drain(..) {
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                tracing::warn!("A poll loop did not stop within {STOP_TIMEOUT:?}");
            }
        }

        run.state = final_state;
        tracing::info!("Collection stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, TagSpec};
    use crate::device::ControllerKind;
    use crate::device::sim::{SimBank, register_simulator};
    use crate::storage::{HistoricalQuery, SqliteBackend, StorageBackend};
    use tempfile::tempdir;

    fn sim_registry(bank: &SimBank) -> Arc<DriverRegistry> {
        let mut registry = DriverRegistry::new();
        register_simulator(&mut registry, bank.clone());
        Arc::new(registry)
    }

    fn device(name: &str, address: &str, tags: &[&str], scan_rate: f64) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            controller: ControllerKind::Simulator,
            address: address.to_string(),
            slot: None,
            tags: tags
                .iter()
                .map(|t| TagSpec {
                    tag: t.to_string(),
                    description: None,
                    data_type: None,
                    scan_rate,
                })
                .collect(),
        }
    }

    async fn open_backend(dir: &tempfile::TempDir) -> Arc<dyn StorageBackend> {
        let path = dir.path().join("collector.db");
        let backend = SqliteBackend::connect(&format!("sqlite:{}", path.display()))
            .await
            .unwrap();
        backend.init_schema().await.unwrap();
        Arc::new(backend)
    }

    fn fast_options() -> CollectorOptions {
        CollectorOptions {
            write_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_without_backend_fails_visibly() {
        let bank = SimBank::new();
        let collector = Collector::new(
            vec![device("Line1", "sim-1", &["Speed"], 0.05)],
            sim_registry(&bank),
            None,
            CollectorOptions::default(),
        );

        assert!(matches!(
            collector.start().await,
            Err(CollectorError::NoStorageBackend)
        ));
        assert_eq!(collector.state().await, CollectorState::Idle);
    }

    #[tokio::test]
    async fn test_start_collect_stop_roundtrip() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir).await;
        let bank = SimBank::new();
        bank.device("sim-1").set_tag("Speed", 42.5);

        let collector = Collector::new(
            vec![device("Line1", "sim-1", &["Speed"], 0.02)],
            sim_registry(&bank),
            Some(Arc::clone(&backend)),
            fast_options(),
        );

        collector.start().await.unwrap();
        assert_eq!(collector.state().await, CollectorState::Running);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = collector.status().await;
        assert!(status["Line1"].connected);
        assert!(status["Line1"].collecting);

        collector.stop().await;
        assert_eq!(collector.state().await, CollectorState::Idle);
        assert!(!collector.status().await["Line1"].collecting);

        let rows = backend.historical(&HistoricalQuery::default()).await.unwrap();
        assert!(!rows.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir).await;
        let bank = SimBank::new();
        bank.device("sim-1").set_tag("Speed", 1.0);

        let collector = Collector::new(
            vec![device("Line1", "sim-1", &["Speed"], 0.05)],
            sim_registry(&bank),
            Some(backend),
            fast_options(),
        );

        collector.start().await.unwrap();
        collector.start().await.unwrap();
        assert_eq!(collector.state().await, CollectorState::Running);
        collector.stop().await;
    }

    #[tokio::test]
    async fn test_device_without_tags_is_skipped() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir).await;
        let bank = SimBank::new();
        bank.device("sim-1").set_tag("Speed", 1.0);

        let collector = Collector::new(
            vec![
                device("Line1", "sim-1", &["Speed"], 0.02),
                device("Bare", "sim-2", &[], 1.0),
            ],
            sim_registry(&bank),
            Some(backend),
            fast_options(),
        );

        collector.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let status = collector.status().await;
        assert!(status.contains_key("Line1"));
        assert!(!status.contains_key("Bare"));

        collector.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let bank = SimBank::new();
        let collector = Collector::new(
            Vec::new(),
            sim_registry(&bank),
            None,
            CollectorOptions::default(),
        );

        collector.shutdown().await;
        assert_eq!(collector.state().await, CollectorState::ShuttingDown);

        // start after shutdown is ignored
        collector.start().await.unwrap();
        assert_eq!(collector.state().await, CollectorState::ShuttingDown);
    }
}
