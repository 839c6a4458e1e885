//! Storage media for record collections.
//!
//! A backend only moves opaque bytes per collection; encoding, locking and
//! record semantics live in [`RecordStore`](crate::store::RecordStore).

use async_trait::async_trait;

use crate::error::StoreError;

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Bytes of `collection`, or `None` if it has never been written.
    async fn read(&self, collection: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the bytes of `collection` as one atomic step. On error the
    /// previous contents must still be readable.
    async fn write(&self, collection: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    async fn exists(&self, collection: &str) -> Result<bool, StoreError>;
}

/// Collection names double as file names: keep them to `[a-z0-9_-]`.
pub fn validate_collection_name(collection: &str) -> Result<(), StoreError> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(collection.to_string()))
    }
}
