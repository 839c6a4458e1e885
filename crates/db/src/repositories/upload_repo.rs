//! Queries on the `uploads` collection.

use occtrack_core::error::CoreError;
use occtrack_core::types::Timestamp;
use occtrack_core::upload::normalize_tags;

use crate::error::DbResult;
use crate::models::{Detection, Entity, Upload, UploadAccess};

use super::Repository;

impl Repository<Upload> {
    /// One user's uploads in insertion order.
    pub async fn list_by_user(&self, user_id: &str) -> DbResult<Vec<Upload>> {
        self.list(|u| u.user_id == user_id).await
    }

    /// Count one download and stamp the access time.
    pub async fn record_access(&self, id: &str, at: Timestamp) -> DbResult<Upload> {
        self.update(
            id,
            UploadAccess {
                downloads: 1,
                accessed_at: Some(at),
            },
        )
        .await
    }

    /// Replace the tag set of an upload no detection refers to yet.
    pub async fn set_tags(&self, id: &str, tags: &[String]) -> DbResult<Upload> {
        let tags = normalize_tags(tags)?;

        // Detection creation takes the uploads lock before committing, so
        // while we hold it the referencing set cannot grow.
        let guard = self.store().lock(Upload::COLLECTION).await;
        let detections: Vec<Detection> = self.store().load_all(Detection::COLLECTION).await?;
        if detections.iter().any(|d| d.upload_id == id) {
            return Err(CoreError::ConstraintViolation(format!(
                "upload {id} is referenced by a detection and can no longer change"
            ))
            .into());
        }

        let (upload, ()) = self
            .modify_locked(&guard, id, |current, _now| {
                let mut next = current.clone();
                next.tags = tags;
                Ok((next, ()))
            })
            .await?;
        Ok(upload)
    }
}
