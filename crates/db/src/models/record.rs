//! Fields and behaviour shared by every persisted entity.

use occtrack_core::error::CoreError;
use occtrack_core::types::{new_record_id, RecordId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Server-assigned identity and timestamps, flattened into each record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub id: RecordId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RecordMeta {
    /// Fresh identity stamped at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at` without ever moving it backwards.
    pub fn touch(&mut self, now: Timestamp) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// A field value that must be unique across a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    pub field: &'static str,
    pub value: String,
}

impl UniqueKey {
    pub fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// A foreign key that must resolve when the record is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub collection: &'static str,
    pub entity: &'static str,
    pub id: RecordId,
}

/// Minimal view used to resolve a [`Reference`] without decoding the full type.
#[derive(Debug, Deserialize)]
pub(crate) struct RecordStub {
    pub id: RecordId,
}

/// A record type bound to one collection.
///
/// The repository drives these hooks in a fixed order on every write:
/// build or patch, [`recompute`](Entity::recompute), reference check,
/// uniqueness check, persist.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Backing collection name.
    const COLLECTION: &'static str;
    /// Human-readable entity name used in errors.
    const ENTITY: &'static str;

    /// Caller input for `create`.
    type Create: Send;
    /// Caller input for `update`.
    type Patch: Send;

    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }

    /// Validate `input` and build a new record around `meta`.
    fn build(meta: RecordMeta, input: Self::Create) -> Result<Self, CoreError>;

    /// Return a new record with `patch` applied. Must not modify `self`.
    fn patched(&self, patch: Self::Patch, now: Timestamp) -> Result<Self, CoreError>;

    /// Re-derive computed fields. Called before every write.
    fn recompute(&mut self) {}

    fn unique_keys(&self) -> Vec<UniqueKey> {
        Vec::new()
    }

    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }
}
