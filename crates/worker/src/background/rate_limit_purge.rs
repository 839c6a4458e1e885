//! Periodic eviction of expired request counter windows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use occtrack_db::WindowedCounter;
use tokio_util::sync::CancellationToken;

/// Run the purge loop until `cancel` is triggered.
pub async fn run(counter: Arc<WindowedCounter>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Rate limit purge started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Rate limit purge stopping");
                break;
            }
            _ = ticker.tick() => {
                let purged = counter.purge_expired(Utc::now());
                if purged > 0 {
                    tracing::debug!(purged, remaining = counter.tracked(), "Rate limit purge: dropped expired windows");
                }
            }
        }
    }
}
