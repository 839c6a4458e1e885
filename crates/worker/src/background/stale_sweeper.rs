//! Periodic failure of detections stuck in `processing`.
//!
//! A detection whose worker died mid-analysis would stay `processing`
//! forever. This task fails every such detection older than the configured
//! timeout with `STALE_PROCESSING`. It never requeues: the lifecycle does
//! not allow returning to `pending`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::runner::JobRunner;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(
    runner: JobRunner,
    timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        timeout_secs = timeout.as_secs(),
        interval_secs = interval.as_secs(),
        "Stale job sweeper started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale job sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                match runner.sweep_stale(timeout).await {
                    Ok(failed) if failed > 0 => {
                        tracing::warn!(failed, "Stale job sweeper: failed stuck jobs");
                    }
                    Ok(_) => {
                        tracing::debug!("Stale job sweeper: nothing to do");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Stale job sweeper: sweep failed");
                    }
                }
            }
        }
    }
}
