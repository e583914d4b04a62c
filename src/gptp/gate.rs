//! Clock readiness gate
//!
//! Polls a [`ClockSource`] until the link reports asCapable. The loop
//! observes the shared cancellation token on every iteration and while
//! sleeping, so a Ctrl+C is seen within one poll interval at most.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ClockError;
use crate::gptp::snapshot::{ClockSnapshot, ClockSource};

/// Block until the clock is ready, the token is cancelled or `timeout` elapses
pub async fn wait_until_ready(
    source: &dyn ClockSource,
    cancel: &CancellationToken,
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> Result<ClockSnapshot, ClockError> {
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(ClockError::Cancelled);
        }

        match source.snapshot() {
            Ok(snapshot) if snapshot.ready => {
                tracing::info!("asCapable enabled, grandmaster {:016x}", snapshot.grandmaster_u64());
                return Ok(snapshot);
            }
            Ok(_) => {}
            Err(ClockError::Busy) => tracing::debug!("gPTP data busy, retrying"),
            Err(e) => return Err(e),
        }

        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(ClockError::Timeout(limit));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ClockError::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
