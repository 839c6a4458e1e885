//! The analysis seam: what the job runner hands to an analyzer, what it gets
//! back, and how failures are classified.
//!
//! The algorithm itself is opaque. [`SimulatedAnalyzer`] is a deterministic
//! stand-in that produces plausible vehicle sets until a real model is wired
//! in behind the same [`Analyzer`] trait.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::lifecycle::{
    ErrorDetails, ERROR_ANALYSIS_FAILED, ERROR_ANALYSIS_TIMEOUT, ERROR_INVALID_RESULT,
    ERROR_UPLOAD_NOT_FOUND,
};
use crate::occlusion::{
    validate_vehicles, BoundingBox, DetectionResults, Occlusion, Vehicle,
};
use crate::types::{RecordId, Timestamp};
use crate::upload::MediaKind;

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

/// Content reference handed to the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisInput {
    pub detection_id: RecordId,
    pub upload_id: RecordId,
    pub storage_path: String,
    pub media_kind: MediaKind,
    pub checksum: String,
}

/// Raw analyzer output. Aggregates are derived later, never supplied here.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub vehicles: Vec<Vehicle>,
    pub model_version: Option<String>,
}

impl AnalysisResult {
    /// Reject malformed analyzer output before it reaches a record.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        validate_vehicles(&self.vehicles).map_err(|e| AnalysisError::InvalidResult(e.to_string()))
    }

    pub fn into_results(self) -> DetectionResults {
        DetectionResults::from_vehicles(self.vehicles, self.model_version)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis failed: {0}")]
    Failed(String),

    #[error("analysis timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("analysis returned an invalid result: {0}")]
    InvalidResult(String),

    #[error("upload {0} no longer exists")]
    UploadNotFound(RecordId),
}

impl AnalysisError {
    /// Stable code recorded in `errorDetails.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Failed(_) => ERROR_ANALYSIS_FAILED,
            Self::Timeout(_) => ERROR_ANALYSIS_TIMEOUT,
            Self::InvalidResult(_) => ERROR_INVALID_RESULT,
            Self::UploadNotFound(_) => ERROR_UPLOAD_NOT_FOUND,
        }
    }

    pub fn to_error_details(&self, now: Timestamp) -> ErrorDetails {
        ErrorDetails::new(self.code(), self.to_string(), now)
    }
}

// ---------------------------------------------------------------------------
// Analyzer trait
// ---------------------------------------------------------------------------

/// An image/video analysis backend.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisResult, AnalysisError>;
}

// ---------------------------------------------------------------------------
// SimulatedAnalyzer
// ---------------------------------------------------------------------------

const VEHICLE_TYPES: &[&str] = &["car", "truck", "bus", "motorcycle", "van", "bicycle"];

/// Probability that a generated vehicle is partly hidden.
const OCCLUSION_PROBABILITY: f64 = 0.35;

const FRAME_WIDTH: f64 = 1920.0;
const FRAME_HEIGHT: f64 = 1080.0;

const SIMULATED_MODEL_VERSION: &str = "simulated-1";

/// Synthetic analyzer seeded from the upload checksum, so the same upload
/// always yields the same vehicles.
#[derive(Debug, Clone)]
pub struct SimulatedAnalyzer {
    max_vehicles: usize,
    latency: Duration,
}

impl Default for SimulatedAnalyzer {
    fn default() -> Self {
        Self::new(12, Duration::from_millis(250))
    }
}

impl SimulatedAnalyzer {
    pub fn new(max_vehicles: usize, latency: Duration) -> Self {
        Self {
            max_vehicles,
            latency,
        }
    }

    fn generate(&self, input: &AnalysisInput) -> AnalysisResult {
        let mut rng = StdRng::seed_from_u64(seed_from(&input.checksum));
        let count = rng.random_range(0..=self.max_vehicles);

        let mut vehicles: Vec<Vehicle> = Vec::with_capacity(count);
        for i in 0..count {
            let width = rng.random_range(40.0..400.0);
            let height = rng.random_range(30.0..250.0);
            let occlusion = if i > 0 && rng.random_bool(OCCLUSION_PROBABILITY) {
                let blocker = &vehicles[rng.random_range(0..i)];
                Occlusion::from_percentage(rng.random_range(5.0..95.0), vec![blocker.id.clone()])
            } else {
                Occlusion::clear()
            };
            vehicles.push(Vehicle {
                id: format!("v{}", i + 1),
                vehicle_type: VEHICLE_TYPES[rng.random_range(0..VEHICLE_TYPES.len())].to_string(),
                confidence: rng.random_range(0.5..1.0),
                bounding_box: BoundingBox {
                    x: rng.random_range(0.0..FRAME_WIDTH - width),
                    y: rng.random_range(0.0..FRAME_HEIGHT - height),
                    width,
                    height,
                },
                occlusion,
            });
        }

        AnalysisResult {
            vehicles,
            model_version: Some(SIMULATED_MODEL_VERSION.to_string()),
        }
    }
}

#[async_trait]
impl Analyzer for SimulatedAnalyzer {
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisResult, AnalysisError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.generate(input))
    }
}

/// FNV-1a over the checksum text.
fn seed_from(checksum: &str) -> u64 {
    checksum
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| {
            (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
