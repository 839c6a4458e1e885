//! Shared fixtures for job runner integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use occtrack_core::analysis::{AnalysisError, AnalysisInput, AnalysisResult, Analyzer};
use occtrack_core::lifecycle::DetectionStatus;
use occtrack_core::occlusion::{BoundingBox, Occlusion, Vehicle};
use occtrack_db::models::{CreateDetection, CreateUpload, Detection, Upload};
use occtrack_db::{RecordStore, Repositories};
use occtrack_events::EventBus;
use occtrack_worker::{JobRunner, RunnerConfig};
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Analyzers
// ---------------------------------------------------------------------------

/// Returns a fixed vehicle list after a short delay.
pub struct FixedAnalyzer {
    pub vehicles: Vec<Vehicle>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FixedAnalyzer {
    pub fn new(vehicles: Vec<Vehicle>) -> Self {
        Self {
            vehicles,
            delay: Duration::from_millis(20),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, _input: &AnalysisInput) -> Result<AnalysisResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(AnalysisResult {
            vehicles: self.vehicles.clone(),
            model_version: Some("test-1".to_string()),
        })
    }
}

/// Always fails with the given error after a short delay.
pub struct FailingAnalyzer(pub AnalysisError);

#[async_trait]
impl Analyzer for FailingAnalyzer {
    async fn analyze(&self, _input: &AnalysisInput) -> Result<AnalysisResult, AnalysisError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Err(self.0.clone())
    }
}

/// Blocks each call until the test releases a permit.
pub struct GatedAnalyzer {
    pub gate: Semaphore,
    pub calls: AtomicUsize,
}

impl GatedAnalyzer {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for GatedAnalyzer {
    async fn analyze(&self, _input: &AnalysisInput) -> Result<AnalysisResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(AnalysisError::Failed("gate closed".to_string())),
        }
        Ok(AnalysisResult {
            vehicles: vec![vehicle("v1", 0.0)],
            model_version: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub struct Harness {
    pub repos: Repositories,
    pub runner: JobRunner,
    pub events: Arc<EventBus>,
}

pub async fn memory_repos() -> Repositories {
    let repos = Repositories::new(RecordStore::in_memory());
    repos.ensure_initialized().await.unwrap();
    repos
}

pub fn config() -> RunnerConfig {
    RunnerConfig {
        concurrency: 2,
        queue_capacity: 16,
        analysis_timeout: Duration::from_secs(5),
    }
}

pub fn start(repos: &Repositories, analyzer: Arc<dyn Analyzer>, config: RunnerConfig) -> Harness {
    let events = Arc::new(EventBus::default());
    let runner = JobRunner::start(repos, analyzer, Arc::clone(&events), config);
    Harness {
        repos: repos.clone(),
        runner,
        events,
    }
}

pub fn vehicle(id: &str, occlusion_pct: f64) -> Vehicle {
    Vehicle {
        id: id.to_string(),
        vehicle_type: "car".to_string(),
        confidence: 0.92,
        bounding_box: BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 120.0,
            height: 80.0,
        },
        occlusion: Occlusion::from_percentage(occlusion_pct, Vec::new()),
    }
}

pub async fn seed(repos: &Repositories, seed: u8) -> (Upload, Detection) {
    let upload = repos
        .uploads
        .create(CreateUpload {
            user_id: "u1".to_string(),
            storage_path: format!("uploads/u1/{seed}.jpg"),
            original_name: format!("{seed}.jpg"),
            media_kind: None,
            mime_type: Some("image/jpeg".to_string()),
            size_bytes: 2048,
            checksum: format!("{seed:02x}").repeat(32),
            tags: Vec::new(),
        })
        .await
        .unwrap();
    let detection = repos
        .detections
        .create(CreateDetection {
            user_id: "u1".to_string(),
            upload_id: upload.meta.id.clone(),
        })
        .await
        .unwrap();
    (upload, detection)
}

/// Poll until the detection reaches `status` or two seconds pass.
pub async fn wait_for_status(repos: &Repositories, id: &str, status: DetectionStatus) -> Detection {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let detection = repos.detections.get(id).await.unwrap();
        if detection.status() == status {
            return detection;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "detection {id} stuck in {} waiting for {status}",
            detection.status()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
