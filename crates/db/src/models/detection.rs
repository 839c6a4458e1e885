//! Detection entity, its annotations and DTOs.

use occtrack_core::annotation::{validate_annotation, AnnotationKind};
use occtrack_core::error::CoreError;
use occtrack_core::lifecycle::{DetectionStatus, ErrorDetails, JobState, Transition};
use occtrack_core::occlusion::DetectionResults;
use occtrack_core::types::{new_record_id, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

use super::record::{Entity, RecordMeta, Reference, UniqueKey};
use super::upload::Upload;

/// A record in the `detections` collection.
///
/// Lifecycle fields live in the flattened [`JobState`] and are only written
/// through [`DetectionPatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub user_id: RecordId,
    pub upload_id: RecordId,
    #[serde(flatten)]
    pub job: JobState,
    #[serde(default)]
    pub results: Option<DetectionResults>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Detection {
    pub fn status(&self) -> DetectionStatus {
        self.job.status
    }

    pub fn is_terminal(&self) -> bool {
        self.job.is_terminal()
    }

    /// Return a copy with `input` appended, enforcing ownership and limits.
    ///
    /// Allowed in every status, terminal ones included.
    pub fn with_annotation(
        &self,
        input: CreateAnnotation,
        now: Timestamp,
    ) -> Result<(Self, Annotation), CoreError> {
        if input.user_id != self.user_id {
            return Err(CoreError::Forbidden(format!(
                "user {} may not annotate detection {}",
                input.user_id, self.meta.id
            )));
        }
        let known = self
            .results
            .iter()
            .flat_map(|r| r.vehicles.iter().map(|v| v.id.as_str()));
        validate_annotation(
            input.kind,
            input.vehicle_id.as_deref(),
            input.comment.as_deref(),
            self.annotations.len(),
            known,
        )?;

        let annotation = Annotation {
            id: new_record_id(),
            user_id: input.user_id,
            kind: input.kind,
            vehicle_id: input.vehicle_id,
            comment: input.comment,
            payload: input.payload,
            created_at: now,
        };
        let mut next = self.clone();
        next.annotations.push(annotation.clone());
        Ok((next, annotation))
    }
}

/// A user correction attached to a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: RecordId,
    pub user_id: RecordId,
    pub kind: AnnotationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

/// DTO for appending an annotation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnnotation {
    pub user_id: RecordId,
    pub kind: AnnotationKind,
    pub vehicle_id: Option<String>,
    pub comment: Option<String>,
    pub payload: Option<serde_json::Value>,
}

/// DTO for creating a detection. New detections always start `pending`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDetection {
    pub user_id: RecordId,
    pub upload_id: RecordId,
}

/// The only ways a stored detection changes besides annotation append.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionPatch {
    Start,
    /// Move to `completed` with the analyzer output. Aggregates in `results`
    /// are recomputed from the vehicle list.
    Complete(DetectionResults),
    Fail(ErrorDetails),
    Cancel,
}

impl DetectionPatch {
    pub fn target(&self) -> DetectionStatus {
        match self {
            Self::Start => DetectionStatus::Processing,
            Self::Complete(_) => DetectionStatus::Completed,
            Self::Fail(_) => DetectionStatus::Failed,
            Self::Cancel => DetectionStatus::Cancelled,
        }
    }
}

impl Entity for Detection {
    const COLLECTION: &'static str = "detections";
    const ENTITY: &'static str = "detection";

    type Create = CreateDetection;
    type Patch = DetectionPatch;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn build(meta: RecordMeta, input: CreateDetection) -> Result<Self, CoreError> {
        if input.user_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "detection owner must not be empty".to_string(),
            ));
        }
        if input.upload_id.trim().is_empty() {
            return Err(CoreError::Validation("uploadId must not be empty".to_string()));
        }
        Ok(Self {
            meta,
            user_id: input.user_id,
            upload_id: input.upload_id,
            job: JobState::pending(),
            results: None,
            annotations: Vec::new(),
        })
    }

    fn patched(&self, patch: DetectionPatch, now: Timestamp) -> Result<Self, CoreError> {
        let mut next = self.clone();
        match patch {
            DetectionPatch::Start => {
                next.job = self.job.apply(Transition::Start, now)?;
            }
            DetectionPatch::Complete(results) => {
                next.job = self.job.apply(Transition::Complete, now)?;
                next.results = Some(results);
            }
            DetectionPatch::Fail(details) => {
                next.job = self.job.apply(Transition::Fail(details), now)?;
            }
            DetectionPatch::Cancel => {
                next.job = self.job.apply(Transition::Cancel, now)?;
            }
        }
        Ok(next)
    }

    fn recompute(&mut self) {
        if let Some(results) = self.results.as_mut() {
            results.recompute();
        }
        self.job.recompute_duration();
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        vec![UniqueKey::new("uploadId", self.upload_id.clone())]
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference {
            collection: Upload::COLLECTION,
            entity: Upload::ENTITY,
            id: self.upload_id.clone(),
        }]
    }
}
