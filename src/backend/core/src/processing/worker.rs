//! Document processor: the worker pool that drains the queue.
//!
//! A single coordinator task keeps up to `max_concurrent_jobs` executors
//! running. Each executor owns a semaphore permit for its lifetime, so the
//! coordinator only dequeues when a slot is free.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::pipeline::Pipeline;
use crate::config::ProcessingConfig;
use crate::jobs::{FailureOutcome, Job, JobQueue};
use crate::telemetry::JobMetrics;

/// Configuration for the document processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum concurrent job executions
    pub max_concurrent_jobs: usize,
    /// Idle wait when the queue is empty
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Wait after a queue error
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    /// Drain bound on shutdown; unbounded when absent
    #[serde(default, with = "humantime_serde")]
    pub shutdown_timeout: Option<Duration>,
    /// Worker name/identifier
    pub name: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            shutdown_timeout: Some(Duration::from_secs(60)),
            name: "mdus-worker".to_string(),
        }
    }
}

impl From<&ProcessingConfig> for ProcessorConfig {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            poll_interval: config.poll_interval,
            error_backoff: config.error_backoff,
            shutdown_timeout: Some(config.shutdown_timeout),
            ..Self::default()
        }
    }
}

/// Statistics for the document processor.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    /// Jobs whose executor finished
    pub processed: Arc<AtomicU64>,
    /// Jobs acknowledged as completed
    pub succeeded: Arc<AtomicU64>,
    /// Executions that failed (requeued or terminal)
    pub failed: Arc<AtomicU64>,
    /// Currently running executors
    pub active: Arc<AtomicU64>,
}

impl ProcessorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// Keeps `active` accurate even if an executor panics.
struct ActiveGuard {
    stats: ProcessorStats,
}

impl ActiveGuard {
    fn enter(stats: &ProcessorStats) -> Self {
        let active = stats.active.fetch_add(1, Ordering::Relaxed) + 1;
        JobMetrics::set_active_jobs(active);
        Self {
            stats: stats.clone(),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let active = self.stats.active.fetch_sub(1, Ordering::Relaxed) - 1;
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        JobMetrics::set_active_jobs(active);
    }
}

/// Handle for controlling a running processor.
pub struct ProcessorHandle {
    shutdown: watch::Sender<bool>,
    stats: ProcessorStats,
    coordinator: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Stop admitting jobs and wait for in-flight executors to drain.
    ///
    /// Executors still running when the shutdown timeout expires are
    /// detached; their jobs stay in-flight for the stuck-job reaper.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.coordinator.await {
            tracing::error!(error = %e, "Processor coordinator panicked");
        }
    }

    /// Get processor statistics.
    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }
}

/// Document processor that executes jobs from a queue.
pub struct DocumentProcessor {
    queue: JobQueue,
    pipeline: Pipeline,
    config: ProcessorConfig,
    stats: ProcessorStats,
}

impl DocumentProcessor {
    /// Create a new document processor.
    pub fn new(queue: JobQueue, pipeline: Pipeline, config: ProcessorConfig) -> Self {
        Self {
            queue,
            pipeline,
            config,
            stats: ProcessorStats::new(),
        }
    }

    /// Start the coordinator, returning a handle for control.
    pub fn start(self) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let coordinator = tokio::spawn(self.run(shutdown_rx));

        ProcessorHandle {
            shutdown: shutdown_tx,
            stats,
            coordinator,
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let config = &self.config;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let mut executors = JoinSet::new();

        tracing::info!(
            worker = %config.name,
            concurrency = config.max_concurrent_jobs,
            "Document processor started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                Some(done) = executors.join_next(), if !executors.is_empty() => {
                    log_join(done);
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let wait = match self.queue.dequeue().await {
                Ok(Some(job)) => {
                    executors.spawn(execute(
                        self.queue.clone(),
                        self.pipeline.clone(),
                        self.stats.clone(),
                        job,
                        permit,
                    ));
                    continue;
                }
                Ok(None) => config.poll_interval,
                Err(e) => {
                    tracing::error!(worker = %config.name, error = %e, "Queue error, backing off");
                    config.error_backoff
                }
            };
            drop(permit);

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!(
            worker = %config.name,
            in_flight = executors.len(),
            "Document processor draining"
        );
        self.drain(executors).await;
        tracing::info!(worker = %config.name, "Document processor stopped");
    }

    async fn drain(&self, mut executors: JoinSet<()>) {
        let all_done = async {
            while let Some(done) = executors.join_next().await {
                log_join(done);
            }
        };

        match self.config.shutdown_timeout {
            None => all_done.await,
            Some(limit) => {
                if tokio::time::timeout(limit, all_done).await.is_err() {
                    tracing::warn!(
                        remaining = executors.len(),
                        timeout_secs = limit.as_secs(),
                        "Shutdown timeout reached; leaving in-flight jobs to the reaper"
                    );
                    executors.detach_all();
                }
            }
        }
    }
}

fn log_join(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        tracing::error!(error = %e, "Executor task panicked; job left for the reaper");
    }
}

/// Run one job and report its outcome. Never returns an error.
async fn execute(
    queue: JobQueue,
    pipeline: Pipeline,
    stats: ProcessorStats,
    job: Job,
    _permit: OwnedSemaphorePermit,
) {
    let _active = ActiveGuard::enter(&stats);
    let Some(lease) = job.lease() else {
        tracing::error!(job_id = %job.id, status = %job.status, "Dequeued job is not in-flight");
        return;
    };
    let started = Instant::now();

    tracing::info!(job_id = %job.id, document_id = job.document_id, "Processing job");

    match pipeline.run(&job).await {
        Ok(result) => match queue.complete(&lease, result).await {
            Ok(_) => {
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
                JobMetrics::record_completed(started.elapsed().as_secs_f64());

                if let Err(e) = pipeline
                    .storage()
                    .move_to_processed(&job.source_locator, job.document_id)
                    .await
                {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to move processed file");
                }
            }
            Err(e) => {
                e.log();
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    "Could not record completion; job left in-flight"
                );
            }
        },
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            match queue.fail(&lease, &e.to_string()).await {
                Ok(FailureOutcome::Requeued { retry_count, .. }) => {
                    tracing::warn!(job_id = %job.id, retry_count, error = %e, "Job execution failed");
                }
                Ok(FailureOutcome::Failed { .. }) => {}
                Err(report_err) => {
                    report_err.log();
                    tracing::error!(
                        job_id = %job.id,
                        error = %report_err,
                        "Could not record failure; job left in-flight"
                    );
                }
            }
        }
    }
}
