//! Detection job runner.
//!
//! Detections are queued by id on a bounded channel and drained by a single
//! dispatcher task that runs each job under a semaphore-limited pool. Every
//! status change goes through the detection repository, so the lifecycle
//! rules and the collection lock apply to the runner like to any caller.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use occtrack_core::analysis::{AnalysisError, AnalysisInput, Analyzer};
use occtrack_core::error::CoreError;
use occtrack_core::lifecycle::{DetectionStatus, ErrorDetails, ERROR_STALE_PROCESSING};
use occtrack_core::occlusion::DetectionResults;
use occtrack_core::types::RecordId;
use occtrack_db::models::{Detection, DetectionPatch};
use occtrack_db::{DbError, DetectionRepo, Repositories, UploadRepo};
use occtrack_events::{EventBus, JobEvent};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Jobs analysed at once.
    pub concurrency: usize,
    /// Queued jobs before `submit` reports [`RunnerError::QueueFull`].
    pub queue_capacity: usize,
    /// Upper bound on one analyzer call.
    pub analysis_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 256,
            analysis_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("job queue is full")]
    QueueFull,

    #[error("job runner is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result of a successful [`JobRunner::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// The detection is already queued or executing in this runner.
    AlreadyInFlight,
}

/// What [`JobRunner::recover_on_startup`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resubmitted: usize,
    pub failed_stale: usize,
}

/// How one analysis attempt ended.
enum Outcome {
    Completed(DetectionResults),
    Failed(AnalysisError),
    Cancelled,
}

// ---------------------------------------------------------------------------
// JobRunner
// ---------------------------------------------------------------------------

/// Handle to the runner. Cheap to clone.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
}

struct Inner {
    detections: DetectionRepo,
    uploads: UploadRepo,
    analyzer: Arc<dyn Analyzer>,
    events: Arc<EventBus>,
    config: RunnerConfig,
    /// `None` once shut down.
    queue: Mutex<Option<mpsc::Sender<RecordId>>>,
    /// Queued or executing detections and their cancellation tokens.
    in_flight: Mutex<HashMap<RecordId, CancellationToken>>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobRunner {
    /// Create the runner and spawn its dispatcher on the current runtime.
    pub fn start(
        repos: &Repositories,
        analyzer: Arc<dyn Analyzer>,
        events: Arc<EventBus>,
        config: RunnerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let inner = Arc::new(Inner {
            detections: repos.detections.clone(),
            uploads: repos.uploads.clone(),
            analyzer,
            events,
            config,
            queue: Mutex::new(Some(tx)),
            in_flight: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&inner).dispatch(rx));
        *lock(&inner.dispatcher) = Some(handle);

        tracing::info!(
            concurrency = inner.config.concurrency,
            queue_capacity = inner.config.queue_capacity,
            analysis_timeout_secs = inner.config.analysis_timeout.as_secs(),
            "Job runner started",
        );
        Self { inner }
    }

    /// Enqueue a detection for analysis without waiting.
    pub fn submit(&self, detection_id: &str) -> Result<Submission, RunnerError> {
        let sender = lock(&self.inner.queue)
            .clone()
            .ok_or(RunnerError::ShuttingDown)?;

        {
            let mut in_flight = lock(&self.inner.in_flight);
            if in_flight.contains_key(detection_id) {
                return Ok(Submission::AlreadyInFlight);
            }
            in_flight.insert(detection_id.to_string(), self.inner.shutdown.child_token());
        }

        let slot = match sender.try_reserve() {
            Ok(slot) => slot,
            Err(e) => {
                self.inner.release(detection_id);
                return Err(match e {
                    mpsc::error::TrySendError::Full(()) => {
                        tracing::warn!(detection_id, "Job queue full, submission rejected");
                        RunnerError::QueueFull
                    }
                    mpsc::error::TrySendError::Closed(()) => RunnerError::ShuttingDown,
                });
            }
        };

        tracing::debug!(detection_id, "Job submitted");
        self.inner
            .events
            .publish(JobEvent::submitted(detection_id, Utc::now()));
        slot.send(detection_id.to_string());
        Ok(Submission::Queued)
    }

    /// Cancel a detection. Idempotent: a terminal detection is returned as is.
    pub async fn cancel(&self, detection_id: &str) -> Result<Detection, RunnerError> {
        let current = self.inner.detections.get(detection_id).await?;
        if current.is_terminal() {
            return Ok(current);
        }

        match self
            .inner
            .detections
            .transition(detection_id, DetectionPatch::Cancel)
            .await
        {
            Ok(cancelled) => {
                if let Some(token) = lock(&self.inner.in_flight).get(detection_id) {
                    token.cancel();
                }
                tracing::info!(detection_id, "Job cancelled");
                self.inner.publish(&cancelled, None);
                Ok(cancelled)
            }
            // Another writer reached a terminal state first; that state stands.
            Err(DbError::Core(CoreError::InvalidTransition { .. })) => {
                Ok(self.inner.detections.get(detection_id).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Restore work left behind by a previous process.
    ///
    /// `pending` detections are queued again, waiting for queue space when
    /// needed. `processing` ones lost their analyzer and are failed.
    pub async fn recover_on_startup(&self) -> Result<RecoveryReport, RunnerError> {
        let mut report = RecoveryReport::default();

        let orphaned = self
            .inner
            .detections
            .list_by_status(DetectionStatus::Processing)
            .await?;
        for detection in orphaned {
            if self.inner.is_in_flight(&detection.meta.id) {
                continue;
            }
            if self
                .inner
                .fail_stale(&detection.meta.id, "job was processing when the worker stopped")
                .await?
            {
                report.failed_stale += 1;
            }
        }

        let pending = self
            .inner
            .detections
            .list_by_status(DetectionStatus::Pending)
            .await?;
        for detection in pending {
            if self.inner.enqueue_waiting(&detection.meta.id).await? {
                report.resubmitted += 1;
            }
        }

        tracing::info!(
            resubmitted = report.resubmitted,
            failed_stale = report.failed_stale,
            "Startup recovery finished",
        );
        Ok(report)
    }

    /// Fail `processing` detections started more than `timeout` ago that
    /// this runner is not executing. Returns how many were failed.
    pub async fn sweep_stale(&self, timeout: Duration) -> Result<usize, RunnerError> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let stale = self
            .inner
            .detections
            .list_stale_processing(Utc::now(), timeout)
            .await?;

        let mut failed = 0;
        for detection in stale {
            if self.inner.is_in_flight(&detection.meta.id) {
                continue;
            }
            if self
                .inner
                .fail_stale(&detection.meta.id, "job exceeded the processing timeout")
                .await?
            {
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Number of detections queued or executing.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Stop accepting work, cancel running jobs and wait for them to finish.
    ///
    /// Detections still queued stay `pending` and are picked up by the next
    /// [`recover_on_startup`](Self::recover_on_startup).
    pub async fn shutdown(&self) {
        lock(&self.inner.queue).take();
        self.inner.shutdown.cancel();
        let handle = lock(&self.inner.dispatcher).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job dispatcher panicked");
            }
        }
        tracing::info!("Job runner stopped");
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl Inner {
    async fn dispatch(self: Arc<Self>, mut rx: mpsc::Receiver<RecordId>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut jobs = JoinSet::new();

        loop {
            while let Some(result) = jobs.try_join_next() {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Job task panicked");
                }
            }

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let detection_id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            let token = lock(&self.in_flight)
                .get(&detection_id)
                .cloned()
                .unwrap_or_else(|| self.shutdown.child_token());
            let this = Arc::clone(&self);
            jobs.spawn(async move {
                let _permit = permit;
                this.execute(&detection_id, token).await;
                this.release(&detection_id);
            });
        }

        rx.close();
        while let Some(result) = jobs.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Job task panicked");
            }
        }
        tracing::info!("Job dispatcher shutting down");
    }

    /// Run one detection to a terminal state. Never returns an error: every
    /// failure is recorded on the detection or logged.
    async fn execute(&self, detection_id: &str, token: CancellationToken) {
        let detection = match self.detections.get(detection_id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(detection_id, error = %e, "Queued detection could not be loaded");
                return;
            }
        };
        if detection.status() != DetectionStatus::Pending || token.is_cancelled() {
            tracing::debug!(detection_id, status = %detection.status(), "Skipping non-pending detection");
            return;
        }

        let started = match self
            .detections
            .transition(detection_id, DetectionPatch::Start)
            .await
        {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(detection_id, error = %e, "Detection could not be started");
                return;
            }
        };
        self.publish(&started, None);

        let patch = match self.analyze(&started, &token).await {
            Outcome::Completed(results) => DetectionPatch::Complete(results),
            Outcome::Failed(err) => {
                tracing::warn!(detection_id, code = err.code(), error = %err, "Analysis failed");
                DetectionPatch::Fail(err.to_error_details(Utc::now()))
            }
            Outcome::Cancelled => {
                tracing::debug!(detection_id, "Analysis interrupted by cancellation");
                return;
            }
        };
        self.finish(detection_id, patch).await;
    }

    async fn analyze(&self, detection: &Detection, token: &CancellationToken) -> Outcome {
        let upload = match self.uploads.find(&detection.upload_id).await {
            Ok(Some(upload)) => upload,
            Ok(None) => {
                return Outcome::Failed(AnalysisError::UploadNotFound(detection.upload_id.clone()))
            }
            Err(e) => {
                return Outcome::Failed(AnalysisError::Failed(format!("upload lookup failed: {e}")))
            }
        };

        let input = AnalysisInput {
            detection_id: detection.meta.id.clone(),
            upload_id: upload.meta.id,
            storage_path: upload.storage_path,
            media_kind: upload.media_kind,
            checksum: upload.checksum,
        };
        let limit = self.config.analysis_timeout;
        let call = AssertUnwindSafe(self.analyzer.analyze(&input)).catch_unwind();

        tokio::select! {
            _ = token.cancelled() => Outcome::Cancelled,
            res = tokio::time::timeout(limit, call) => match res {
                Err(_) => Outcome::Failed(AnalysisError::Timeout(limit)),
                Ok(Err(_panic)) => Outcome::Failed(AnalysisError::Failed("analyzer panicked".to_string())),
                Ok(Ok(Err(e))) => Outcome::Failed(e),
                Ok(Ok(Ok(result))) => match result.validate() {
                    Ok(()) => Outcome::Completed(result.into_results()),
                    Err(e) => Outcome::Failed(e),
                },
            },
        }
    }

    async fn finish(&self, detection_id: &str, patch: DetectionPatch) {
        let error = match &patch {
            DetectionPatch::Fail(details) => Some(details.clone()),
            _ => None,
        };
        match self.detections.transition(detection_id, patch).await {
            Ok(done) => {
                tracing::info!(
                    detection_id,
                    status = %done.status(),
                    duration_ms = done.job.processing_duration,
                    "Job finished",
                );
                self.publish(&done, error);
            }
            Err(DbError::Core(CoreError::InvalidTransition { from, .. })) => {
                tracing::debug!(detection_id, status = %from, "Detection reached a terminal state first");
            }
            Err(e) => {
                tracing::error!(detection_id, error = %e, "Failed to record job outcome");
            }
        }
    }

    /// Fail one stale `processing` detection. `false` if it moved on meanwhile.
    async fn fail_stale(&self, detection_id: &str, message: &str) -> Result<bool, DbError> {
        let details = ErrorDetails::new(ERROR_STALE_PROCESSING, message, Utc::now());
        match self
            .detections
            .transition(detection_id, DetectionPatch::Fail(details.clone()))
            .await
        {
            Ok(failed) => {
                tracing::warn!(detection_id, "Stale processing job failed");
                self.publish(&failed, Some(details));
                Ok(true)
            }
            Err(DbError::Core(CoreError::InvalidTransition { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Queue with backpressure by waiting. `false` if already in flight.
    async fn enqueue_waiting(&self, detection_id: &str) -> Result<bool, RunnerError> {
        let sender = lock(&self.queue).clone().ok_or(RunnerError::ShuttingDown)?;
        {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.contains_key(detection_id) {
                return Ok(false);
            }
            in_flight.insert(detection_id.to_string(), self.shutdown.child_token());
        }
        let Ok(slot) = sender.reserve().await else {
            self.release(detection_id);
            return Err(RunnerError::ShuttingDown);
        };
        self.events
            .publish(JobEvent::submitted(detection_id, Utc::now()));
        slot.send(detection_id.to_string());
        Ok(true)
    }

    fn is_in_flight(&self, detection_id: &str) -> bool {
        lock(&self.in_flight).contains_key(detection_id)
    }

    fn release(&self, detection_id: &str) {
        lock(&self.in_flight).remove(detection_id);
    }

    fn publish(&self, detection: &Detection, error: Option<ErrorDetails>) {
        let mut event =
            JobEvent::transitioned(detection.meta.id.clone(), detection.status(), Utc::now());
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.events.publish(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Critical sections never panic, so a poisoned lock still holds valid data.
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
