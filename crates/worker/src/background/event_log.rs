//! Structured log line for every job event on the bus.

use occtrack_events::JobEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Log events until `cancel` fires or the bus is dropped.
pub async fn run(mut receiver: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => received,
        };
        match received {
            Ok(event) => {
                tracing::info!(
                    event_type = %event.event_type,
                    detection_id = %event.detection_id,
                    error_code = event.error.as_ref().map(|e| e.code.as_str()),
                    "Job event"
                );
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event log lagged, some events were not logged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Event bus closed, event log shutting down");
                break;
            }
        }
    }
}
