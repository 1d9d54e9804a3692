//! Background tasks for the Facecast server.
//!
//! Includes:
//! - Ending conversation sessions that have gone idle.

use crate::AppState;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the idle session reaper.
///
/// This task runs indefinitely, periodically ending sessions that have not
/// been used for `threshold_seconds`. Their worker-side state is released.
pub async fn start_session_reaper_task(state: Arc<AppState>, threshold_seconds: u64) {
    if threshold_seconds == 0 {
        tracing::warn!("session reaper disabled (threshold=0)");
        return;
    }

    // Run check every 60 seconds or threshold/2, whichever is smaller (but min 1s)
    let interval_seconds = (threshold_seconds / 2).clamp(1, 60);
    let interval = Duration::from_secs(interval_seconds);
    let max_idle = Duration::from_secs(threshold_seconds);

    tracing::info!(
        threshold_seconds,
        interval_seconds,
        "starting idle session reaper"
    );

    loop {
        sleep(interval).await;

        let reaped = state.coordinator.reap_idle(max_idle).await;
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), sessions = ?reaped, "ended idle sessions");
        }
    }
}
