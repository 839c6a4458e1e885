//! Event type names for detection job lifecycle events.
//!
//! Published on the in-process event bus by the job runner whenever a
//! detection changes status.

use crate::lifecycle::DetectionStatus;

/// Detection record created in `pending`.
pub const JOB_SUBMITTED: &str = "job_submitted";

/// Job entered `processing`.
pub const JOB_STARTED: &str = "job_started";

/// Job completed successfully.
pub const JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const JOB_FAILED: &str = "job_failed";

/// Job was cancelled (by user or system).
pub const JOB_CANCELLED: &str = "job_cancelled";

/// Event type name for the transition that lands in `status`.
pub fn event_type_for(status: DetectionStatus) -> &'static str {
    match status {
        DetectionStatus::Pending => JOB_SUBMITTED,
        DetectionStatus::Processing => JOB_STARTED,
        DetectionStatus::Completed => JOB_COMPLETED,
        DetectionStatus::Failed => JOB_FAILED,
        DetectionStatus::Cancelled => JOB_CANCELLED,
    }
}
