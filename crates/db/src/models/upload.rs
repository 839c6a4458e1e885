//! Upload entity and DTOs.
//!
//! The upload collaborator owns transport and storage-path assignment; this
//! record only tracks what was stored where. Once a detection references an
//! upload, only the bookkeeping fields (`downloadCount`, `lastAccessedAt`)
//! may change.

use occtrack_core::error::CoreError;
use occtrack_core::types::{RecordId, Timestamp};
use occtrack_core::upload::{
    normalize_tags, validate_checksum, validate_size, validate_storage_path, MediaKind,
};
use serde::{Deserialize, Serialize};

use super::record::{Entity, RecordMeta};

/// A record in the `uploads` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub user_id: RecordId,
    pub storage_path: String,
    pub original_name: String,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub checksum: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub last_accessed_at: Option<Timestamp>,
}

/// DTO handed over by the upload collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUpload {
    pub user_id: RecordId,
    pub storage_path: String,
    pub original_name: String,
    /// Inferred from `mime_type` when absent.
    pub media_kind: Option<MediaKind>,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub checksum: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Bookkeeping patch: the only `update` an upload accepts.
#[derive(Debug, Clone, Default)]
pub struct UploadAccess {
    /// Downloads to add to the counter.
    pub downloads: u64,
    pub accessed_at: Option<Timestamp>,
}

impl Entity for Upload {
    const COLLECTION: &'static str = "uploads";
    const ENTITY: &'static str = "upload";

    type Create = CreateUpload;
    type Patch = UploadAccess;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn build(meta: RecordMeta, input: CreateUpload) -> Result<Self, CoreError> {
        if input.user_id.trim().is_empty() {
            return Err(CoreError::Validation("upload owner must not be empty".to_string()));
        }
        validate_storage_path(&input.storage_path)?;
        validate_size(input.size_bytes)?;
        validate_checksum(&input.checksum)?;

        let media_kind = match input.media_kind {
            Some(kind) => kind,
            None => input
                .mime_type
                .as_deref()
                .and_then(MediaKind::from_mime)
                .ok_or_else(|| {
                    CoreError::Validation(
                        "media kind is missing and cannot be inferred from the MIME type"
                            .to_string(),
                    )
                })?,
        };

        Ok(Self {
            meta,
            user_id: input.user_id,
            storage_path: input.storage_path.trim().to_string(),
            original_name: input.original_name,
            media_kind,
            mime_type: input.mime_type,
            size_bytes: input.size_bytes,
            checksum: input.checksum.to_ascii_lowercase(),
            tags: normalize_tags(&input.tags)?,
            download_count: 0,
            last_accessed_at: None,
        })
    }

    fn patched(&self, patch: UploadAccess, _now: Timestamp) -> Result<Self, CoreError> {
        let mut next = self.clone();
        next.download_count = next.download_count.saturating_add(patch.downloads);
        if let Some(at) = patch.accessed_at {
            next.last_accessed_at = Some(next.last_accessed_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(next)
    }
}
