//! Detection job lifecycle: statuses, legal transitions, and their side effects.
//!
//! Every transition is a pure function from one [`JobState`] to a new one.
//! An illegal move returns [`CoreError::InvalidTransition`] and leaves the
//! input untouched, so callers can run it inside a read-modify-write without
//! any rollback logic.
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!    │            │  └──────▶ failed
//!    └────────────┴─────────▶ cancelled
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Error codes recorded in `errorDetails.code`
// ---------------------------------------------------------------------------

/// The analyzer returned an error.
pub const ERROR_ANALYSIS_FAILED: &str = "ANALYSIS_FAILED";
/// The analyzer did not answer within the configured timeout.
pub const ERROR_ANALYSIS_TIMEOUT: &str = "ANALYSIS_TIMEOUT";
/// The analyzer answered with data that fails validation.
pub const ERROR_INVALID_RESULT: &str = "INVALID_RESULT";
/// The upload referenced by the detection no longer exists.
pub const ERROR_UPLOAD_NOT_FOUND: &str = "UPLOAD_NOT_FOUND";
/// The job sat in `processing` past the stale timeout (runner crash or restart).
pub const ERROR_STALE_PROCESSING: &str = "STALE_PROCESSING";

// ---------------------------------------------------------------------------
// DetectionStatus
// ---------------------------------------------------------------------------

/// Status of a detection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// All valid status strings.
const VALID_STATUS_STRINGS: &[&str] = &["pending", "processing", "completed", "failed", "cancelled"];

impl DetectionStatus {
    /// Statuses from which no further transition is allowed.
    pub const TERMINAL: [DetectionStatus; 3] = [Self::Completed, Self::Failed, Self::Cancelled];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Whether the state machine has an edge from `self` to `to`.
    pub fn can_transition_to(self, to: DetectionStatus) -> bool {
        use DetectionStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(CoreError::Validation(format!(
                "Invalid detection status '{s}'. Must be one of: {}",
                VALID_STATUS_STRINGS.join(", ")
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorDetails
// ---------------------------------------------------------------------------

/// Why a job ended in `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    /// One of the `ERROR_*` constants in this module.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub occurred_at: Timestamp,
}

impl ErrorDetails {
    pub fn new(code: &str, message: impl Into<String>, now: Timestamp) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
            occurred_at: now,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A requested lifecycle move.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `pending -> processing`.
    Start,
    /// `processing -> completed`.
    Complete,
    /// `processing -> failed`, recording why.
    Fail(ErrorDetails),
    /// `pending | processing -> cancelled`.
    Cancel,
}

impl Transition {
    /// The status this transition lands in.
    pub fn target(&self) -> DetectionStatus {
        match self {
            Self::Start => DetectionStatus::Processing,
            Self::Complete => DetectionStatus::Completed,
            Self::Fail(_) => DetectionStatus::Failed,
            Self::Cancel => DetectionStatus::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// The lifecycle-owned slice of a detection record.
///
/// Only the transition functions below write these fields; the repository
/// layer never accepts them from callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub status: DetectionStatus,
    #[serde(default)]
    pub processing_start_time: Option<Timestamp>,
    #[serde(default)]
    pub processing_end_time: Option<Timestamp>,
    /// Milliseconds between start and end, derived.
    #[serde(default)]
    pub processing_duration: Option<i64>,
    #[serde(default)]
    pub error_details: Option<ErrorDetails>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::pending()
    }
}

impl JobState {
    /// The initial state of every detection.
    pub fn pending() -> Self {
        Self {
            status: DetectionStatus::Pending,
            processing_start_time: None,
            processing_end_time: None,
            processing_duration: None,
            error_details: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply `transition` at time `now`, returning the new state.
    pub fn apply(&self, transition: Transition, now: Timestamp) -> Result<Self, CoreError> {
        let to = transition.target();
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        let mut next = self.clone();
        next.status = to;
        match transition {
            Transition::Start => {
                next.processing_start_time = Some(now);
            }
            Transition::Complete => {
                next.processing_end_time = Some(self.end_time(now));
            }
            Transition::Fail(details) => {
                next.processing_end_time = Some(self.end_time(now));
                next.error_details = Some(details);
            }
            Transition::Cancel => {
                if next.processing_end_time.is_none() {
                    next.processing_end_time = Some(self.end_time(now));
                }
            }
        }
        next.recompute_duration();
        Ok(next)
    }

    pub fn start(&self, now: Timestamp) -> Result<Self, CoreError> {
        self.apply(Transition::Start, now)
    }

    pub fn complete(&self, now: Timestamp) -> Result<Self, CoreError> {
        self.apply(Transition::Complete, now)
    }

    pub fn fail(&self, details: ErrorDetails, now: Timestamp) -> Result<Self, CoreError> {
        self.apply(Transition::Fail(details), now)
    }

    pub fn cancel(&self, now: Timestamp) -> Result<Self, CoreError> {
        self.apply(Transition::Cancel, now)
    }

    /// Re-derive `processing_duration` from the two timestamps.
    pub fn recompute_duration(&mut self) {
        self.processing_duration = match (self.processing_start_time, self.processing_end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0)),
            _ => None,
        };
    }

    /// A job is stale when it has been `processing` for longer than `timeout`.
    pub fn is_stale(&self, now: Timestamp, timeout: chrono::Duration) -> bool {
        match (self.status, self.processing_start_time) {
            (DetectionStatus::Processing, Some(start)) => now - start > timeout,
            _ => false,
        }
    }

    /// End timestamps never precede the start timestamp.
    fn end_time(&self, now: Timestamp) -> Timestamp {
        self.processing_start_time
            .map_or(now, |start| start.max(now))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
