//! Shared fixtures for repository integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use occtrack_core::occlusion::{BoundingBox, Occlusion, Vehicle};
use occtrack_db::models::{CreateDetection, CreateUpload, CreateUser, Detection, Upload};
use occtrack_db::{MemoryBackend, RecordStore, Repositories};

/// Repositories over a fresh in-memory store, plus the backend for fault injection.
pub async fn memory_repos() -> (Arc<MemoryBackend>, Repositories) {
    let backend = Arc::new(MemoryBackend::new());
    let repos = Repositories::new(RecordStore::new(backend.clone()));
    repos.ensure_initialized().await.unwrap();
    (backend, repos)
}

pub fn checksum(seed: u8) -> String {
    format!("{seed:02x}").repeat(32)
}

pub fn new_user(name: &str) -> CreateUser {
    CreateUser {
        username: name.to_string(),
        email: format!("{name}@example.com"),
        display_name: None,
    }
}

pub fn new_upload(user_id: &str, seed: u8) -> CreateUpload {
    CreateUpload {
        user_id: user_id.to_string(),
        storage_path: format!("uploads/{user_id}/{seed}.jpg"),
        original_name: format!("frame-{seed}.jpg"),
        media_kind: None,
        mime_type: Some("image/jpeg".to_string()),
        size_bytes: 1024,
        checksum: checksum(seed),
        tags: Vec::new(),
    }
}

pub fn new_detection(user_id: &str, upload_id: &str) -> CreateDetection {
    CreateDetection {
        user_id: user_id.to_string(),
        upload_id: upload_id.to_string(),
    }
}

/// Create an upload and a pending detection for it.
pub async fn seeded_detection(repos: &Repositories, user_id: &str, seed: u8) -> (Upload, Detection) {
    let upload = repos.uploads.create(new_upload(user_id, seed)).await.unwrap();
    let detection = repos
        .detections
        .create(new_detection(user_id, &upload.meta.id))
        .await
        .unwrap();
    (upload, detection)
}

pub fn vehicle(id: &str, occlusion_pct: f64) -> Vehicle {
    Vehicle {
        id: id.to_string(),
        vehicle_type: "car".to_string(),
        confidence: 0.9,
        bounding_box: BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 60.0,
        },
        occlusion: Occlusion::from_percentage(occlusion_pct, Vec::new()),
    }
}
