//! Per-device poll loops.
//!
//! One tokio task per managed device, ticking at that device's scan rate.
//! Each cycle reads every configured tag through the device session; a
//! non-empty result becomes a sample batch stamped with one shared capture
//! instant and enqueued for the storage writer. Loops are fully
//! independent: a slow or failing device never delays another device's
//! cadence.
//!
//! Shutdown is cooperative. The cancellation token is observed at the top
//! of every cycle and while sleeping; an in-flight device read is allowed
//! to complete before the loop exits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collect::queue::SampleQueue;
use crate::device::DeviceSession;
use crate::storage::SampleBatch;

/// Smallest accepted scan interval.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(10);

/// Clamp a configured scan interval to the supported minimum.
pub fn clamp_scan_interval(interval: Duration) -> Duration {
    if interval < MIN_SCAN_INTERVAL {
        tracing::warn!(
            requested = ?interval,
            min = ?MIN_SCAN_INTERVAL,
            "Scan interval below minimum, clamping"
        );
        MIN_SCAN_INTERVAL
    } else {
        interval
    }
}

/// Spawn the poll loop for one device.
///
/// The session moves into the task; callers keep its
/// [`crate::device::SessionState`] handle for status queries.
pub(crate) fn spawn_poll_loop(
    mut session: DeviceSession,
    tag_names: Vec<String>,
    scan_interval: Duration,
    queue: Arc<SampleQueue>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let scan_interval = clamp_scan_interval(scan_interval);

    tokio::spawn(async move {
        let device = session.name().to_string();
        let state = session.state_handle();
        state.set_collecting(true);
        tracing::info!(device = %device, interval = ?scan_interval, tags = tag_names.len(), "Poll loop started");

        let mut ticker = tokio::time::interval(scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // First tick completes immediately; later ticks pace the loop.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            let values = session.read_tags(&tag_names).await;
            if !values.is_empty() {
                queue.push(SampleBatch::new(&device, Utc::now(), values));
            } else {
                tracing::debug!(device = %device, "Collected nothing this cycle");
            }
        }

        session.disconnect().await;
        state.set_collecting(false);
        tracing::info!(device = %device, "Poll loop stopped");
    })
}
