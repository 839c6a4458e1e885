//! User corrections appended to a detection after analysis.
//!
//! Annotations are append-only and remain writable after the job reaches a
//! terminal state. This module holds the kinds and the validation rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of annotations on one detection.
pub const MAX_ANNOTATIONS_PER_DETECTION: usize = 500;

/// Maximum length of an annotation comment.
pub const MAX_COMMENT_LENGTH: usize = 2000;

// ---------------------------------------------------------------------------
// AnnotationKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Free-form remark.
    Note,
    /// A detected vehicle is not actually a vehicle.
    FalsePositive,
    /// A vehicle the analyzer did not report.
    MissedVehicle,
    /// The occlusion classification of a vehicle is wrong.
    OcclusionCorrection,
}

impl AnnotationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::FalsePositive => "false_positive",
            Self::MissedVehicle => "missed_vehicle",
            Self::OcclusionCorrection => "occlusion_correction",
        }
    }

    /// Kinds that must point at a vehicle present in the results.
    pub fn targets_existing_vehicle(self) -> bool {
        matches!(self, Self::FalsePositive | Self::OcclusionCorrection)
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate_comment(comment: &str) -> Result<(), CoreError> {
    let len = comment.chars().count();
    if len > MAX_COMMENT_LENGTH {
        return Err(CoreError::Validation(format!(
            "comment has {len} characters, maximum is {MAX_COMMENT_LENGTH}"
        )));
    }
    Ok(())
}

/// Validate a new annotation against the detection it is appended to.
///
/// `existing_count` is the number of annotations already stored and
/// `known_vehicle_ids` the ids present in the detection's results.
pub fn validate_annotation<'a>(
    kind: AnnotationKind,
    vehicle_id: Option<&str>,
    comment: Option<&str>,
    existing_count: usize,
    mut known_vehicle_ids: impl Iterator<Item = &'a str>,
) -> Result<(), CoreError> {
    if existing_count >= MAX_ANNOTATIONS_PER_DETECTION {
        return Err(CoreError::ConstraintViolation(format!(
            "detection already has the maximum of {MAX_ANNOTATIONS_PER_DETECTION} annotations"
        )));
    }
    if let Some(comment) = comment {
        validate_comment(comment)?;
    }
    if kind.targets_existing_vehicle() {
        let Some(vehicle_id) = vehicle_id else {
            return Err(CoreError::Validation(format!(
                "a {kind} annotation must name a vehicle"
            )));
        };
        if !known_vehicle_ids.any(|id| id == vehicle_id) {
            return Err(CoreError::Validation(format!(
                "vehicle '{vehicle_id}' is not part of this detection's results"
            )));
        }
    }
    if kind == AnnotationKind::Note && comment.map_or(true, |c| c.trim().is_empty()) {
        return Err(CoreError::Validation(
            "a note annotation needs a comment".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ids<'a>(list: &'a [&'static str]) -> impl Iterator<Item = &'static str> + 'a {
        list.iter().copied()
    }

    #[test]
    fn note_needs_comment() {
        assert!(validate_annotation(AnnotationKind::Note, None, Some("glare"), 0, ids(&[])).is_ok());
        assert_matches!(
            validate_annotation(AnnotationKind::Note, None, Some("  "), 0, ids(&[])),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn false_positive_must_reference_known_vehicle() {
        assert!(validate_annotation(
            AnnotationKind::FalsePositive,
            Some("v1"),
            None,
            0,
            ids(&["v1", "v2"])
        )
        .is_ok());
        assert!(validate_annotation(
            AnnotationKind::FalsePositive,
            Some("v9"),
            None,
            0,
            ids(&["v1"])
        )
        .is_err());
        assert!(validate_annotation(AnnotationKind::OcclusionCorrection, None, None, 0, ids(&["v1"])).is_err());
    }

    #[test]
    fn missed_vehicle_needs_no_existing_target() {
        assert!(validate_annotation(AnnotationKind::MissedVehicle, None, None, 0, ids(&[])).is_ok());
    }

    #[test]
    fn annotation_cap_enforced() {
        assert_matches!(
            validate_annotation(
                AnnotationKind::MissedVehicle,
                None,
                None,
                MAX_ANNOTATIONS_PER_DETECTION,
                ids(&[])
            ),
            Err(CoreError::ConstraintViolation(_))
        );
    }

    #[test]
    fn long_comment_rejected() {
        let long = "x".repeat(MAX_COMMENT_LENGTH + 1);
        assert!(validate_comment(&long).is_err());
    }
}
