//! Device session: one connection to one controller.
//!
//! The session owns the live driver handle and the device's runtime state
//! (connected flag, consecutive-error count, last successful read). Read
//! errors accumulate; at [`MAX_CONSECUTIVE_ERRORS`] the session forces a
//! disconnect so the next call re-establishes the connection from scratch.
//!
//! No operation here is fatal to the process: every call returns a success
//! indicator or an empty result, and the poll loop simply moves on to its
//! next cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::driver::{DeviceDescriptor, DriverRegistry, TagDriver};
use crate::value::TagValue;

/// Consecutive read/connect errors before a forced reconnect.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Shared runtime state of one device, readable without locking.
///
/// The poll loop writes these fields; status queries read them on demand
/// without ever blocking the loop.
#[derive(Debug, Default)]
pub struct SessionState {
    connected: AtomicBool,
    error_count: AtomicU32,
    /// Microseconds since epoch of the last successful read; 0 = never.
    last_read_micros: AtomicI64,
    collecting: AtomicBool,
}

impl SessionState {
    pub(crate) fn set_collecting(&self, collecting: bool) {
        self.collecting.store(collecting, Ordering::Relaxed);
    }

    /// Point-in-time status snapshot.
    pub fn snapshot(&self) -> DeviceStatus {
        let micros = self.last_read_micros.load(Ordering::Relaxed);
        DeviceStatus {
            connected: self.connected.load(Ordering::Relaxed),
            last_read_at: (micros != 0).then(|| DateTime::from_timestamp_micros(micros)).flatten(),
            error_count: self.error_count.load(Ordering::Relaxed),
            collecting: self.collecting.load(Ordering::Relaxed),
        }
    }
}

/// Status snapshot of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub last_read_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub collecting: bool,
}

/// One managed connection to one controller.
pub struct DeviceSession {
    descriptor: DeviceDescriptor,
    registry: Arc<DriverRegistry>,
    driver: Option<Box<dyn TagDriver>>,
    state: Arc<SessionState>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub fn new(descriptor: DeviceDescriptor, registry: Arc<DriverRegistry>) -> Self {
        Self {
            descriptor,
            registry,
            driver: None,
            state: Arc::new(SessionState::default()),
        }
    }

    /// Device name from the descriptor.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Handle to the shared runtime state, for status queries.
    pub fn state_handle(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    /// Point-in-time status snapshot.
    pub fn status(&self) -> DeviceStatus {
        self.state.snapshot()
    }

    /// Establish a fresh connection through the registered driver.
    ///
    /// On success the consecutive-error count resets to zero. Failure is
    /// reported in the return value only; the caller retries on its next
    /// cycle.
    pub async fn connect(&mut self) -> bool {
        let mut driver = match self.registry.create(&self.descriptor) {
            Ok(driver) => driver,
            Err(e) => {
                tracing::warn!(device = %self.descriptor.name, error = %e, "Driver setup failed");
                self.record_failure();
                return false;
            }
        };

        match driver.open().await {
            Ok(()) => {
                self.driver = Some(driver);
                self.state.connected.store(true, Ordering::Relaxed);
                self.state.error_count.store(0, Ordering::Relaxed);
                tracing::info!(
                    device = %self.descriptor.name,
                    address = %self.descriptor.address,
                    kind = %self.descriptor.kind,
                    "Device connected"
                );
                true
            }
            Err(e) => {
                tracing::warn!(device = %self.descriptor.name, error = %e, "Connect failed");
                self.record_failure();
                false
            }
        }
    }

    /// Close the connection if open.
    pub async fn disconnect(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.close().await;
            tracing::debug!(device = %self.descriptor.name, "Device disconnected");
        }
        self.state.connected.store(false, Ordering::Relaxed);
    }

    /// Read the named tags, connecting first if necessary.
    ///
    /// Returns the subset that resolved; a partial or empty map means
    /// "collected nothing (or less) this cycle", never an error. A read
    /// failure bumps the consecutive-error count and, at the threshold,
    /// forces a disconnect so the next call starts from `connect`.
    pub async fn read_tags(&mut self, names: &[String]) -> BTreeMap<String, TagValue> {
        if !self.state.connected.load(Ordering::Relaxed) && !self.connect().await {
            return BTreeMap::new();
        }

        let Some(driver) = self.driver.as_mut() else {
            return BTreeMap::new();
        };

        match driver.read(names).await {
            Ok(pairs) => {
                self.state
                    .last_read_micros
                    .store(Utc::now().timestamp_micros(), Ordering::Relaxed);
                self.state.error_count.store(0, Ordering::Relaxed);
                pairs.into_iter().collect()
            }
            Err(e) => {
                tracing::warn!(device = %self.descriptor.name, error = %e, "Tag read failed");
                let errors = self.record_failure();
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    tracing::warn!(
                        device = %self.descriptor.name,
                        errors,
                        "Error threshold reached, forcing reconnect"
                    );
                    self.disconnect().await;
                }
                BTreeMap::new()
            }
        }
    }

    /// Best-effort single tag write.
    ///
    /// A distinct failure domain from polling: failures are reported to
    /// the caller only and never touch the reconnect policy.
    pub async fn write_tag(&mut self, name: &str, value: TagValue) -> bool {
        if !self.state.connected.load(Ordering::Relaxed) && !self.connect().await {
            return false;
        }

        let Some(driver) = self.driver.as_mut() else {
            return false;
        };

        match driver.write(name, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device = %self.descriptor.name, tag = %name, error = %e, "Tag write failed");
                false
            }
        }
    }

    fn record_failure(&mut self) -> u32 {
        self.state.connected.store(false, Ordering::Relaxed);
        self.state.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}
