//! Detection job processing for the occlusion tracking service.
//!
//! [`Service`] wires the record store, the [`JobRunner`], the event bus,
//! the request counters and the background maintenance tasks together;
//! the `occtrack-worker` binary is a thin shell around it.

pub mod background;
pub mod config;
pub mod runner;

use std::sync::Arc;

use anyhow::Context;
use occtrack_core::analysis::Analyzer;
use occtrack_db::{open_store, Repositories, WindowedCounter};
use occtrack_events::EventBus;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use config::{LogFormat, WorkerConfig};
pub use runner::{JobRunner, RecoveryReport, RunnerConfig, RunnerError, Submission};

/// A running worker: storage, job runner and maintenance tasks.
pub struct Service {
    pub repos: Repositories,
    pub runner: JobRunner,
    pub events: Arc<EventBus>,
    pub rate_limiter: Arc<WindowedCounter>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Service {
    /// Open storage, start the runner, recover leftover jobs and spawn the
    /// background tasks.
    pub async fn start(config: &WorkerConfig, analyzer: Arc<dyn Analyzer>) -> anyhow::Result<Self> {
        let repos = open_store(&config.data_dir)
            .await
            .with_context(|| format!("failed to open data directory {}", config.data_dir.display()))?;
        let events = Arc::new(EventBus::default());
        let rate_limiter = Arc::new(WindowedCounter::new(
            chrono::Duration::from_std(config.rate_limit_window)
                .context("RATE_LIMIT_WINDOW_SECS is out of range")?,
            config.rate_limit_max_requests,
        ));

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn(background::event_log::run(events.subscribe(), cancel.clone()));

        let runner = JobRunner::start(&repos, analyzer, Arc::clone(&events), config.runner());
        runner
            .recover_on_startup()
            .await
            .context("startup recovery failed")?;

        tasks.spawn(background::stale_sweeper::run(
            runner.clone(),
            config.stale_processing_timeout,
            config.stale_sweep_interval,
            cancel.clone(),
        ));
        tasks.spawn(background::rate_limit_purge::run(
            Arc::clone(&rate_limiter),
            config.rate_limit_window,
            cancel.clone(),
        ));

        Ok(Self {
            repos,
            runner,
            events,
            rate_limiter,
            cancel,
            tasks,
        })
    }

    /// Stop the runner first, then the background tasks.
    pub async fn shutdown(self) {
        self.runner.shutdown().await;
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
