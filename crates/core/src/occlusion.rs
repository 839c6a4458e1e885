//! Vehicle detections, per-vehicle occlusion classification, and the
//! aggregate statistics derived from them.
//!
//! Aggregates (`totalVehicles`, `occludedVehicles`, `occlusionPercentage`)
//! are never trusted from input. [`DetectionResults::recompute`] rebuilds
//! them from the vehicle list and is called before every write. The
//! per-vehicle flag and level belong to the analyzer and are kept as given.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Vehicles occluded below this percentage are `partial`.
pub const PARTIAL_OCCLUSION_MAX: f64 = 40.0;

/// Vehicles occluded below this percentage (and at least partial) are `heavy`.
pub const HEAVY_OCCLUSION_MAX: f64 = 80.0;

/// Upper bound on vehicles in a single result set.
pub const MAX_VEHICLES: usize = 1000;

// ---------------------------------------------------------------------------
// OcclusionLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcclusionLevel {
    None,
    Partial,
    Heavy,
    Complete,
}

impl OcclusionLevel {
    /// Classify an occlusion percentage (expected in `0.0..=100.0`).
    pub fn from_percentage(pct: f64) -> Self {
        if pct <= 0.0 {
            Self::None
        } else if pct < PARTIAL_OCCLUSION_MAX {
            Self::Partial
        } else if pct < HEAVY_OCCLUSION_MAX {
            Self::Heavy
        } else {
            Self::Complete
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::Heavy => "heavy",
            Self::Complete => "complete",
        }
    }
}

// ---------------------------------------------------------------------------
// Vehicle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Occlusion classification of one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occlusion {
    pub is_occluded: bool,
    pub occlusion_level: OcclusionLevel,
    pub occlusion_percentage: f64,
    /// Ids of the vehicles covering this one.
    #[serde(default)]
    pub occluded_by: Vec<String>,
}

impl Occlusion {
    /// Classify from a percentage alone, for analyzers that report nothing else.
    pub fn from_percentage(pct: f64, occluded_by: Vec<String>) -> Self {
        let pct = clamp_percentage(pct);
        let occlusion_level = OcclusionLevel::from_percentage(pct);
        Self {
            is_occluded: occlusion_level != OcclusionLevel::None,
            occlusion_level,
            occlusion_percentage: pct,
            occluded_by,
        }
    }

    /// Visible vehicle, nothing in front of it.
    pub fn clear() -> Self {
        Self::from_percentage(0.0, Vec::new())
    }

    /// Clamp the percentage into range. Flag and level are left alone.
    pub fn normalize(&mut self) {
        self.occlusion_percentage = clamp_percentage(self.occlusion_percentage);
    }
}

fn clamp_percentage(pct: f64) -> f64 {
    if pct.is_finite() {
        pct.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    #[serde(rename = "type")]
    pub vehicle_type: String,
    /// Detector confidence in `0.0..=1.0`.
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    pub occlusion: Occlusion,
}

/// Validate a single vehicle entry.
pub fn validate_vehicle(vehicle: &Vehicle) -> Result<(), CoreError> {
    if vehicle.id.trim().is_empty() {
        return Err(CoreError::Validation("vehicle id must not be empty".to_string()));
    }
    if vehicle.vehicle_type.trim().is_empty() {
        return Err(CoreError::Validation(format!(
            "vehicle '{}' has an empty type",
            vehicle.id
        )));
    }
    if !vehicle.confidence.is_finite() || !(0.0..=1.0).contains(&vehicle.confidence) {
        return Err(CoreError::Validation(format!(
            "vehicle '{}' confidence must be between 0 and 1, got {}",
            vehicle.id, vehicle.confidence
        )));
    }
    let b = &vehicle.bounding_box;
    let finite = [b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite());
    if !finite || b.width < 0.0 || b.height < 0.0 {
        return Err(CoreError::Validation(format!(
            "vehicle '{}' has an invalid bounding box",
            vehicle.id
        )));
    }
    Ok(())
}

/// Validate a full vehicle list: each entry plus id uniqueness and size.
pub fn validate_vehicles(vehicles: &[Vehicle]) -> Result<(), CoreError> {
    if vehicles.len() > MAX_VEHICLES {
        return Err(CoreError::Validation(format!(
            "result has {} vehicles, maximum is {MAX_VEHICLES}",
            vehicles.len()
        )));
    }
    let mut seen = HashSet::with_capacity(vehicles.len());
    for vehicle in vehicles {
        validate_vehicle(vehicle)?;
        if !seen.insert(vehicle.id.as_str()) {
            return Err(CoreError::Validation(format!(
                "duplicate vehicle id '{}'",
                vehicle.id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// DetectionResults
// ---------------------------------------------------------------------------

/// Stored analysis output for a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResults {
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub total_vehicles: u32,
    #[serde(default)]
    pub occluded_vehicles: u32,
    #[serde(default)]
    pub occlusion_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl DetectionResults {
    pub fn from_vehicles(vehicles: Vec<Vehicle>, model_version: Option<String>) -> Self {
        let mut results = Self {
            vehicles,
            total_vehicles: 0,
            occluded_vehicles: 0,
            occlusion_percentage: 0.0,
            model_version,
        };
        results.recompute();
        results
    }

    /// Rebuild every derived field from the vehicle list.
    pub fn recompute(&mut self) {
        for vehicle in &mut self.vehicles {
            vehicle.occlusion.normalize();
        }
        let total = self.vehicles.len() as u32;
        let occluded = self
            .vehicles
            .iter()
            .filter(|v| v.occlusion.is_occluded)
            .count() as u32;
        self.total_vehicles = total;
        self.occluded_vehicles = occluded;
        self.occlusion_percentage = occlusion_percentage(occluded, total);
    }
}

/// `occluded / total * 100`, or 0 for an empty set.
pub fn occlusion_percentage(occluded: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        occluded as f64 / total as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
