//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! The job runner publishes a [`JobEvent`] for every lifecycle change it
//! causes. Share the bus via `Arc<EventBus>`.

use occtrack_core::job_events::{event_type_for, JOB_SUBMITTED};
use occtrack_core::lifecycle::{DetectionStatus, ErrorDetails};
use occtrack_core::types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A detection job lifecycle change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    /// One of the `JOB_*` names in `occtrack_core::job_events`.
    pub event_type: String,
    pub detection_id: RecordId,
    /// Status after the change. Absent for `job_submitted`.
    pub status: Option<DetectionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    pub timestamp: Timestamp,
}

impl JobEvent {
    /// The detection was accepted onto the runner's queue.
    pub fn submitted(detection_id: impl Into<RecordId>, at: Timestamp) -> Self {
        Self {
            event_type: JOB_SUBMITTED.to_string(),
            detection_id: detection_id.into(),
            status: None,
            error: None,
            timestamp: at,
        }
    }

    /// The detection moved to `status`.
    pub fn transitioned(
        detection_id: impl Into<RecordId>,
        status: DetectionStatus,
        at: Timestamp,
    ) -> Self {
        Self {
            event_type: event_type_for(status).to_string(),
            detection_id: detection_id.into(),
            status: Some(status),
            error: None,
            timestamp: at,
        }
    }

    pub fn with_error(mut self, error: ErrorDetails) -> Self {
        self.error = Some(error);
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Every subscriber independently receives every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unread events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(
            event_type = %event.event_type,
            detection_id = %event.detection_id,
            "Job event published"
        );
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
