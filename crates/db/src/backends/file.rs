//! One JSON file per collection under a data directory.
//!
//! Writes go to a uniquely named temp file next to the target, are fsynced,
//! then renamed over the target. A failed write removes the temp file and
//! leaves the previous file untouched.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{validate_collection_name, StorageBackend};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (and create if needed) a data directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io("<root>", e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `collection`.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.json"))
    }

    async fn write_temp(temp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(bytes).await?;
        // Data must be on disk before the rename makes it visible.
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, collection: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_collection_name(collection)?;
        match fs::read(self.collection_path(collection)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(collection, e)),
        }
    }

    async fn write(&self, collection: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        validate_collection_name(collection)?;
        let path = self.collection_path(collection);
        let temp_path = self
            .root
            .join(format!("{collection}.json.tmp.{}", Uuid::new_v4()));

        if let Err(e) = Self::write_temp(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(collection, e));
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(collection, e));
        }

        tracing::trace!(collection, bytes = bytes.len(), "Collection file replaced");
        Ok(())
    }

    async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
        validate_collection_name(collection)?;
        fs::try_exists(self.collection_path(collection))
            .await
            .map_err(|e| StoreError::io(collection, e))
    }
}
