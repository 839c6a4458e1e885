//! Queries and lifecycle writes on the `detections` collection.

use chrono::Duration;
use occtrack_core::history::{page_bounds, HistoryStats, HistoryStatsBuilder};
use occtrack_core::lifecycle::DetectionStatus;
use occtrack_core::types::Timestamp;
use serde::Deserialize;

use crate::error::DbResult;
use crate::models::{Annotation, CreateAnnotation, Detection, DetectionPatch};

use super::Repository;

/// Filters for [`Repository::<Detection>::history`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<DetectionStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Repository<Detection> {
    /// Move a detection through its lifecycle.
    ///
    /// Fails with `InvalidTransition` (record untouched) when the move is
    /// not legal from the stored status.
    pub async fn transition(&self, id: &str, patch: DetectionPatch) -> DbResult<Detection> {
        let target = patch.target();
        let detection = self.update(id, patch).await?;
        tracing::debug!(
            detection_id = %id,
            status = %target,
            "Detection transitioned"
        );
        Ok(detection)
    }

    /// Append an annotation. Permitted in terminal states too.
    pub async fn append_annotation(
        &self,
        id: &str,
        input: CreateAnnotation,
    ) -> DbResult<Annotation> {
        let (_, annotation) = self
            .modify(id, |current, now| current.with_annotation(input, now))
            .await?;
        tracing::debug!(
            detection_id = %id,
            annotation_id = %annotation.id,
            kind = %annotation.kind,
            "Annotation appended"
        );
        Ok(annotation)
    }

    /// The detection for an upload, if one exists.
    pub async fn find_by_upload(&self, upload_id: &str) -> DbResult<Option<Detection>> {
        Ok(self
            .list(|d| d.upload_id == upload_id)
            .await?
            .into_iter()
            .next())
    }

    pub async fn list_by_status(&self, status: DetectionStatus) -> DbResult<Vec<Detection>> {
        self.list(|d| d.status() == status).await
    }

    /// One user's detections, newest first, paged.
    pub async fn history(&self, user_id: &str, query: &HistoryQuery) -> DbResult<Vec<Detection>> {
        let (limit, offset) = page_bounds(query.limit, query.offset);
        let mut items = self
            .list(|d| d.user_id == user_id && query.status.map_or(true, |s| d.status() == s))
            .await?;
        items.sort_by(|a, b| {
            b.meta
                .created_at
                .cmp(&a.meta.created_at)
                .then_with(|| b.meta.id.cmp(&a.meta.id))
        });
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    /// Summary numbers over all of one user's detections.
    pub async fn stats(&self, user_id: &str) -> DbResult<HistoryStats> {
        let mut builder = HistoryStatsBuilder::new();
        for d in self.list(|d| d.user_id == user_id).await? {
            builder.add(d.status(), d.results.as_ref(), d.job.processing_duration);
        }
        Ok(builder.finish())
    }

    /// `processing` detections started more than `timeout` before `now`.
    pub async fn list_stale_processing(
        &self,
        now: Timestamp,
        timeout: Duration,
    ) -> DbResult<Vec<Detection>> {
        self.list(|d| d.job.is_stale(now, timeout)).await
    }
}
