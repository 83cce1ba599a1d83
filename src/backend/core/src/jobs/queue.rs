//! Job store and priority queue contract, plus the `JobQueue` service.
//!
//! A backend keeps one record per job and four scored indices over job ids:
//!
//! | index      | score                          | order             |
//! |------------|--------------------------------|-------------------|
//! | pending    | `(-priority, enqueue sequence)`| served first-low  |
//! | processing | `started_at`                   | oldest first      |
//! | completed  | `completed_at`                 | oldest first      |
//! | failed     | `completed_at`                 | oldest first      |
//!
//! Every operation that moves an id between indices also writes the record,
//! and does both in one atomic step. Moves out of the processing index are
//! fenced by a [`Lease`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::job::{
    DocumentId, DocumentType, Job, JobId, JobStatus, JobStatusView, Lease, MAX_PRIORITY, MIN_PRIORITY,
};
use super::result::ProcessingResult;
use super::retry::{RetryDecision, RetryPolicy};
use crate::config::RedisConfig;
use crate::error::{ErrorCode, MdusError, Result};
use crate::telemetry::metrics::JobMetrics;

/// Sizes of the four indices plus lifetime totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// Lifetime counters; they survive purges
    pub totals: QueueTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTotals {
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Trait for queue backends.
///
/// Store operations (`put`, `get`, `delete`) do not enforce the lifecycle;
/// the queue operations do.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Job store
    // ─────────────────────────────────────────────────────────────────────────

    /// Upsert a record and refresh its expiry.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Fetch a record. Expired records read as absent.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Remove a record.
    async fn delete(&self, id: JobId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Priority queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a queued record and add it to the pending index.
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Pop the highest-priority pending job and move it in-flight.
    ///
    /// The returned record is already `Processing`, stamped with `now` and
    /// a fresh attempt number. Pending ids whose record has expired are
    /// dropped on the way.
    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Move an in-flight job to the completed index and write `job`.
    ///
    /// Fails with `JobNotInFlight` unless the stored record is in-flight
    /// under `lease`.
    async fn acknowledge_complete(&self, lease: &Lease, job: &Job) -> Result<()>;

    /// Move an in-flight job to the failed index and write `job`.
    async fn acknowledge_failed(&self, lease: &Lease, job: &Job) -> Result<()>;

    /// Move an in-flight job back to pending at `job.priority` and write `job`.
    async fn requeue(&self, lease: &Lease, job: &Job) -> Result<()>;

    /// Index sizes and totals.
    async fn stats(&self) -> Result<QueueStats>;

    /// In-flight ids started at or before `older_than`. Read-only.
    async fn scan_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<JobId>>;

    /// Completed and failed ids finished at or before `older_than`. Read-only.
    async fn scan_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<JobId>>;

    /// Delete a terminal job's record and its index entry.
    ///
    /// Returns false when the job is not terminal; nothing is changed then.
    async fn purge(&self, id: JobId) -> Result<bool>;

    /// Drop `id` from every index without touching any record.
    ///
    /// Used when an index names a job whose record has expired.
    async fn evict(&self, id: JobId) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Queue Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the job queue service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// `max_retries` stamped on new jobs
    pub max_retries: u32,
    pub retry_policy: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// How a failure report was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    Requeued { retry_count: u32, priority: i32 },
    Failed { retry_count: u32 },
}

/// Result of one stuck-job sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    /// In-flight ids past the timeout
    pub scanned: u64,
    pub requeued: u64,
    pub failed: u64,
    /// Ids whose state changed under us (completed or reaped elsewhere)
    pub skipped: u64,
    /// Dangling index entries whose record had expired
    pub evicted: u64,
}

impl ReapReport {
    /// Jobs this sweep actually moved.
    pub fn reaped(&self) -> u64 {
        self.requeued + self.failed
    }
}

/// Producer, status and lifecycle facade over a [`QueueBackend`].
///
/// The only place the retry policy is applied; executors and the stuck-job
/// reaper both report failures through [`JobQueue::fail`].
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue with the given backend.
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        Self { backend, config }
    }

    /// Create a new in-memory job queue (for tests and single-process use).
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(super::memory::InMemoryQueueBackend::new()),
            QueueConfig::default(),
        )
    }

    /// Queue on the configured Redis backend, stamping new jobs with
    /// `max_retries`.
    pub fn redis(config: &RedisConfig, max_retries: u32) -> Result<Self> {
        let backend = super::redis::RedisQueueBackend::connect(config)?;
        Ok(Self::new(
            Arc::new(backend),
            QueueConfig {
                max_retries,
                ..QueueConfig::default()
            },
        ))
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Admit a new job. The sole way jobs come into existence.
    pub async fn enqueue(
        &self,
        document_id: DocumentId,
        source_locator: impl Into<String>,
        document_type: DocumentType,
        priority: i32,
    ) -> Result<JobId> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(MdusError::new(
                ErrorCode::InvalidPriority,
                format!(
                    "Priority {} outside [{}, {}]",
                    priority, MIN_PRIORITY, MAX_PRIORITY
                ),
            ));
        }

        let job = Job::new(
            document_id,
            source_locator,
            document_type,
            priority,
            self.config.max_retries,
        );
        self.backend.enqueue(&job).await?;

        JobMetrics::record_enqueued(job.document_type.as_str());
        tracing::info!(
            job_id = %job.id,
            document_id = job.document_id,
            document_type = %job.document_type,
            priority,
            "Job queued"
        );
        Ok(job.id)
    }

    /// Current state of a job.
    pub async fn get_status(&self, id: JobId) -> Result<JobStatusView> {
        self.backend
            .get(id)
            .await?
            .map(JobStatusView::from)
            .ok_or_else(|| MdusError::job_not_found(id))
    }

    /// Just the status of a job that must exist.
    pub async fn status_of(&self, id: JobId) -> Result<JobStatus> {
        Ok(self.get_status(id).await?.status)
    }

    /// Claim the next pending job.
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        let job = self.backend.dequeue(Utc::now()).await?;
        if let Some(ref job) = job {
            tracing::info!(
                job_id = %job.id,
                attempt = job.attempt,
                priority = job.priority,
                "Job started"
            );
        }
        Ok(job)
    }

    /// Load the record `lease` refers to and check the lease still holds.
    async fn leased(&self, lease: &Lease) -> Result<Job> {
        let job = match self.backend.get(lease.job_id).await? {
            Some(job) => job,
            None => {
                self.backend.evict(lease.job_id).await?;
                return Err(MdusError::new(
                    ErrorCode::RecordExpired,
                    format!("Job record expired while in-flight: {}", lease.job_id),
                ));
            }
        };
        if !job.is_held_by(lease) {
            return Err(MdusError::not_in_flight(lease.job_id));
        }
        Ok(job)
    }

    /// Record a successful pipeline run.
    pub async fn complete(&self, lease: &Lease, result: ProcessingResult) -> Result<Job> {
        let mut job = self.leased(lease).await?;
        job.mark_completed(result, Utc::now())?;
        self.backend.acknowledge_complete(lease, &job).await?;

        tracing::info!(job_id = %job.id, "Job completed");
        Ok(job)
    }

    /// Record a fatal failure of the attempt under `lease` and apply the
    /// retry policy.
    pub async fn fail(&self, lease: &Lease, error: &str) -> Result<FailureOutcome> {
        let mut job = self.leased(lease).await?;
        job.retry_count += 1;

        match self.config.retry_policy.decide(&job) {
            RetryDecision::Requeue { priority } => {
                job.mark_retry(error, priority)?;
                self.backend.requeue(lease, &job).await?;
                JobMetrics::record_retried();
                tracing::warn!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    priority,
                    error,
                    "Job queued for retry"
                );
                Ok(FailureOutcome::Requeued {
                    retry_count: job.retry_count,
                    priority,
                })
            }
            RetryDecision::Fail => {
                job.mark_failed(error, Utc::now())?;
                self.backend.acknowledge_failed(lease, &job).await?;
                JobMetrics::record_failed();
                tracing::error!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    error,
                    "Job failed"
                );
                Ok(FailureOutcome::Failed {
                    retry_count: job.retry_count,
                })
            }
        }
    }

    /// Treat every job in-flight for longer than `timeout` as failed.
    ///
    /// A job whose state changes between the scan and the report (it
    /// completed, or another sweep got there first) is skipped, so each
    /// stuck attempt is reaped at most once.
    pub async fn reap_stuck(&self, timeout: Duration) -> Result<ReapReport> {
        let cutoff = cutoff_before(timeout);
        let stuck = self.backend.scan_stuck(cutoff).await?;
        let message = format!("Job timeout after {}s", timeout.as_secs());

        let mut report = ReapReport {
            scanned: stuck.len() as u64,
            ..ReapReport::default()
        };

        for id in stuck {
            let lease = match self.backend.get(id).await? {
                None => {
                    self.backend.evict(id).await?;
                    report.evicted += 1;
                    tracing::warn!(job_id = %id, "Evicted in-flight entry with no record");
                    continue;
                }
                Some(job) => match job.lease() {
                    Some(lease) => lease,
                    None => {
                        report.skipped += 1;
                        continue;
                    }
                },
            };

            match self.fail(&lease, &message).await {
                Ok(FailureOutcome::Requeued { .. }) => report.requeued += 1,
                Ok(FailureOutcome::Failed { .. }) => report.failed += 1,
                Err(e) if e.code() == ErrorCode::JobNotInFlight => report.skipped += 1,
                Err(e) if matches!(e.code(), ErrorCode::RecordExpired | ErrorCode::JobNotFound) => {
                    report.evicted += 1
                }
                Err(e) => return Err(e),
            }
        }

        JobMetrics::record_reaped(report.reaped());
        tracing::info!(
            scanned = report.scanned,
            requeued = report.requeued,
            failed = report.failed,
            skipped = report.skipped,
            evicted = report.evicted,
            "Stuck job sweep finished"
        );
        Ok(report)
    }

    /// Delete terminal jobs that finished more than `retention` ago.
    pub async fn purge_stale(&self, retention: Duration) -> Result<u64> {
        let cutoff = cutoff_before(retention);
        let stale = self.backend.scan_stale(cutoff).await?;

        let mut purged = 0;
        for id in stale {
            if self.backend.purge(id).await? {
                purged += 1;
            }
        }

        JobMetrics::record_purged(purged);
        tracing::info!(purged, "Old job purge finished");
        Ok(purged)
    }

    /// Index sizes and totals; also publishes the depth gauges.
    pub async fn stats(&self) -> Result<QueueStats> {
        let stats = self.backend.stats().await?;
        JobMetrics::set_queue_depth("pending", stats.pending);
        JobMetrics::set_queue_depth("processing", stats.processing);
        JobMetrics::set_queue_depth("completed", stats.completed);
        JobMetrics::set_queue_depth("failed", stats.failed);
        Ok(stats)
    }
}

/// `now - age`, clamped for ages chrono cannot represent.
fn cutoff_before(age: Duration) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    Utc::now() - age
}
