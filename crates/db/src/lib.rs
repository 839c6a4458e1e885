//! Persistence for the occlusion tracking service.
//!
//! Records live in whole-collection JSON documents behind a
//! [`StorageBackend`]; [`Repository`] layers validation, derived fields,
//! uniqueness and reference checks on top of the [`RecordStore`].

pub mod backends;
pub mod error;
pub mod locks;
pub mod models;
pub mod rate_limit;
pub mod repositories;
pub mod store;

use std::path::PathBuf;

pub use backends::{FileBackend, MemoryBackend, StorageBackend};
pub use error::{DbError, DbResult, StoreError};
pub use rate_limit::{RateDecision, WindowedCounter};
pub use repositories::{DetectionRepo, HistoryQuery, Repository, UploadRepo, UserRepo};
pub use store::{CollectionGuard, Mutation, RecordStore};

/// Repositories for every collection, sharing one store.
#[derive(Clone)]
pub struct Repositories {
    pub users: UserRepo,
    pub uploads: UploadRepo,
    pub detections: DetectionRepo,
}

impl Repositories {
    pub fn new(store: RecordStore) -> Self {
        Self {
            users: Repository::new(store.clone()),
            uploads: Repository::new(store.clone()),
            detections: Repository::new(store),
        }
    }

    /// Create any collection that does not exist yet.
    pub async fn ensure_initialized(&self) -> DbResult<()> {
        self.users.ensure_initialized().await?;
        self.uploads.ensure_initialized().await?;
        self.detections.ensure_initialized().await?;
        Ok(())
    }
}

/// Open the file-backed store under `data_dir` and initialize every collection.
pub async fn open_store(data_dir: impl Into<PathBuf>) -> DbResult<Repositories> {
    let repos = Repositories::new(RecordStore::open(data_dir).await?);
    repos.ensure_initialized().await?;
    Ok(repos)
}
