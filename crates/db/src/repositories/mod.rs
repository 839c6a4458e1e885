//! Repository layer.
//!
//! [`Repository<T>`] carries the generic CRUD operations; each entity adds
//! its own queries in an `impl Repository<Entity>` block in a sibling module.

mod detection_repo;
mod repository;
mod upload_repo;
mod user_repo;

pub use detection_repo::HistoryQuery;
pub use repository::Repository;

use crate::models::{Detection, Upload, User};

pub type UserRepo = Repository<User>;
pub type UploadRepo = Repository<Upload>;
pub type DetectionRepo = Repository<Detection>;
