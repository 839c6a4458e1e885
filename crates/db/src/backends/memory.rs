//! In-process backend for tests, with switchable fault injection.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::StorageBackend;
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a collection's raw bytes, bypassing encoding.
    pub fn put_raw(&self, collection: &str, bytes: impl Into<Vec<u8>>) {
        self.data().insert(collection.to_string(), bytes.into());
    }

    pub fn get_raw(&self, collection: &str) -> Option<Vec<u8>> {
        self.data().get(collection).cloned()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, collection: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::io(collection, io::Error::other("injected read failure")));
        }
        let bytes = self.data().get(collection).cloned();
        // Give other tasks a chance to run between the halves of a
        // read-modify-write, as real I/O would.
        tokio::task::yield_now().await;
        Ok(bytes)
    }

    async fn write(&self, collection: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::io(collection, io::Error::other("injected write failure")));
        }
        self.data().insert(collection.to_string(), bytes);
        Ok(())
    }

    async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.data().contains_key(collection))
    }
}
