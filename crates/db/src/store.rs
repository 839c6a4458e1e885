//! Whole-collection record storage with per-collection write locking.
//!
//! Each collection is one JSON array held by a [`StorageBackend`]. Reads
//! decode the full array; writes encode and atomically replace it. Every
//! logical mutation is a load + replace pair performed while holding the
//! collection's lock (see [`RecordStore::lock`]), so two mutations on the
//! same collection never interleave and no update is lost.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::backends::{FileBackend, MemoryBackend, StorageBackend};
use crate::error::StoreError;
use crate::locks::KeyedLocks;

/// Result of a [`RecordStore::mutate`] closure.
#[derive(Debug)]
pub enum Mutation<R> {
    /// Persist the modified collection, then return the value.
    Commit(R),
    /// Nothing changed; skip the write.
    Unchanged(R),
}

/// Handle to a set of collections on one backend. Cheap to clone.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
    locks: Arc<KeyedLocks>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Store backed by JSON files under `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let backend = FileBackend::open(data_dir).await?;
        tracing::info!(data_dir = %backend.root().display(), "Record store opened");
        Ok(Self::new(Arc::new(backend)))
    }

    /// Store backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Create `collection` as an empty array if it does not exist yet.
    pub async fn ensure_initialized(&self, collection: &str) -> Result<(), StoreError> {
        let guard = self.lock(collection).await;
        if !self.backend.exists(collection).await? {
            guard.replace::<serde_json::Value>(&[]).await?;
            tracing::info!(collection, "Collection initialized");
        }
        Ok(())
    }

    /// Snapshot of the full collection.
    ///
    /// Does not take the collection lock: writes are atomic replaces, so a
    /// reader always sees one complete version. A collection that was never
    /// written reads as empty; an unreadable or malformed one is an error.
    pub async fn load_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        let Some(bytes) = self.backend.read(collection).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&bytes).map_err(|source| {
            tracing::error!(collection, error = %source, "Collection failed to decode");
            StoreError::Corrupt {
                collection: collection.to_string(),
                source,
            }
        })
    }

    /// Atomically overwrite the full collection.
    pub async fn replace_all<T: Serialize>(&self, collection: &str, records: &[T]) -> Result<(), StoreError> {
        self.lock(collection).await.replace(records).await
    }

    /// Acquire the write lock for `collection`.
    ///
    /// Hold the returned guard across the load and replace of one logical
    /// mutation. Locks are independent per collection.
    pub async fn lock(&self, collection: &str) -> CollectionGuard<'_> {
        let guard = self.locks.lock(collection).await;
        CollectionGuard {
            store: self,
            collection: collection.to_string(),
            _guard: guard,
        }
    }

    /// Locked read-modify-write of one collection.
    ///
    /// `f` sees the current records; the collection is replaced only when it
    /// returns [`Mutation::Commit`]. An `Err` from `f` leaves storage untouched.
    pub async fn mutate<T, R, E, F>(&self, collection: &str, f: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnOnce(&mut Vec<T>) -> Result<Mutation<R>, E>,
    {
        let guard = self.lock(collection).await;
        let mut records: Vec<T> = guard.load().await?;
        match f(&mut records)? {
            Mutation::Commit(out) => {
                guard.replace(&records).await?;
                Ok(out)
            }
            Mutation::Unchanged(out) => Ok(out),
        }
    }

    async fn write_records<T: Serialize>(&self, collection: &str, records: &[T]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Encode {
            collection: collection.to_string(),
            source,
        })?;
        self.backend.write(collection, bytes).await.inspect_err(|e| {
            tracing::error!(collection, error = %e, "Collection write failed");
        })?;
        tracing::debug!(collection, records = records.len(), "Collection replaced");
        Ok(())
    }
}

/// Exclusive access to one collection for a load + replace pair.
pub struct CollectionGuard<'a> {
    store: &'a RecordStore,
    collection: String,
    _guard: OwnedMutexGuard<()>,
}

impl CollectionGuard<'_> {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        self.store.load_all(&self.collection).await
    }

    pub async fn replace<T: Serialize>(&self, records: &[T]) -> Result<(), StoreError> {
        self.store.write_records(&self.collection, records).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        name: String,
    }

    fn row(id: u32) -> Row {
        Row {
            id,
            name: format!("row-{id}"),
        }
    }

    fn memory_store() -> (Arc<MemoryBackend>, RecordStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::new(backend.clone());
        (backend, store)
    }

    // -- load / replace ------------------------------------------------------

    #[tokio::test]
    async fn uninitialized_collection_loads_empty() {
        let (_, store) = memory_store();
        let rows: Vec<Row> = store.load_all("rows").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn replace_then_load_preserves_order() {
        let (_, store) = memory_store();
        let rows = vec![row(3), row(1), row(2)];
        store.replace_all("rows", &rows).await.unwrap();
        assert_eq!(store.load_all::<Row>("rows").await.unwrap(), rows);
    }

    #[tokio::test]
    async fn corrupt_collection_is_an_error_not_empty() {
        let (backend, store) = memory_store();
        backend.put_raw("rows", b"[{\"id\": 1,".to_vec());
        assert_matches!(
            store.load_all::<Row>("rows").await,
            Err(StoreError::Corrupt { .. })
        );
    }

    #[tokio::test]
    async fn unreadable_collection_is_an_error() {
        let (backend, store) = memory_store();
        backend.set_fail_reads(true);
        assert_matches!(store.load_all::<Row>("rows").await, Err(StoreError::Io { .. }));
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_state() {
        let (backend, store) = memory_store();
        store.replace_all("rows", &[row(1)]).await.unwrap();

        backend.set_fail_writes(true);
        assert_matches!(
            store.replace_all("rows", &[row(1), row(2)]).await,
            Err(StoreError::Io { .. })
        );
        backend.set_fail_writes(false);

        assert_eq!(store.load_all::<Row>("rows").await.unwrap(), vec![row(1)]);
    }

    // -- ensure_initialized --------------------------------------------------

    #[tokio::test]
    async fn ensure_initialized_is_idempotent() {
        let (backend, store) = memory_store();
        store.ensure_initialized("rows").await.unwrap();
        assert_eq!(backend.get_raw("rows").unwrap(), b"[]");

        store.replace_all("rows", &[row(1)]).await.unwrap();
        store.ensure_initialized("rows").await.unwrap();
        assert_eq!(store.load_all::<Row>("rows").await.unwrap(), vec![row(1)]);
    }

    // -- mutate --------------------------------------------------------------

    #[tokio::test]
    async fn mutate_error_leaves_storage_untouched() {
        let (_, store) = memory_store();
        store.replace_all("rows", &[row(1)]).await.unwrap();

        let result: Result<(), StoreError> = store
            .mutate("rows", |rows: &mut Vec<Row>| {
                rows.clear();
                Err(StoreError::InvalidCollection("nope".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.load_all::<Row>("rows").await.unwrap(), vec![row(1)]);
    }

    #[tokio::test]
    async fn mutate_unchanged_skips_write() {
        let (backend, store) = memory_store();
        let out: Result<usize, StoreError> = store
            .mutate("rows", |rows: &mut Vec<Row>| Ok(Mutation::Unchanged(rows.len())))
            .await;
        assert_eq!(out.unwrap(), 0);
        assert!(backend.get_raw("rows").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mutations_do_not_lose_updates() {
        let (_, store) = memory_store();
        store.ensure_initialized("rows").await.unwrap();

        let tasks: Vec<_> = (0..50u32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .mutate("rows", |rows: &mut Vec<Row>| {
                            rows.push(row(i));
                            Ok::<_, StoreError>(Mutation::Commit(()))
                        })
                        .await
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let rows: Vec<Row> = store.load_all("rows").await.unwrap();
        assert_eq!(rows.len(), 50);
    }
}
