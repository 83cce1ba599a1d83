//! Job store and priority queue.
//!
//! This module owns the job lifecycle:
//!
//! - **Job**: the record, its status machine and the [`Lease`] an executor holds
//! - **Result**: the typed output of the processing pipeline
//! - **Queue**: the [`QueueBackend`] contract and the [`JobQueue`] service
//! - **Backends**: Redis for production, in-memory for tests and single-process use
//! - **Retry**: job-level retry policy and store-level backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Job Lifecycle                                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                                                              │
//! │   enqueue ──▶ ┌─────────┐  dequeue  ┌────────────┐  complete  ┌───────────┐  │
//! │               │ pending │ ────────▶ │ processing │ ─────────▶ │ completed │  │
//! │               └─────────┘           └────────────┘            └───────────┘  │
//! │                    ▲                   │      │                             │
//! │                    │  retry (prio - 1) │      │ retries exhausted           │
//! │                    └───────────────────┘      ▼                             │
//! │                                         ┌──────────┐                        │
//! │                                         │  failed  │                        │
//! │                                         └──────────┘                        │
//! │                                                                              │
//! │   completed / failed ──▶ purged after retention                              │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use mdus_core::jobs::{DocumentType, JobQueue};
//!
//! let queue = JobQueue::in_memory();
//! let id = queue.enqueue(42, "/app/uploads/scan.pdf", DocumentType::Unknown, 0).await?;
//!
//! if let Some(job) = queue.dequeue().await? {
//!     let lease = job.lease().expect("dequeued jobs are in-flight");
//!     // run the pipeline, then
//!     queue.fail(&lease, "inference service unreachable").await?;
//! }
//! ```

pub mod job;
pub mod memory;
pub mod queue;
pub mod redis;
pub mod result;
pub mod retry;

pub use job::{
    DocumentId, DocumentType, Job, JobId, JobStatus, JobStatusView, Lease, MAX_PRIORITY,
    MIN_PRIORITY,
};
pub use memory::InMemoryQueueBackend;
pub use queue::{
    FailureOutcome, JobQueue, QueueBackend, QueueConfig, QueueStats, QueueTotals, ReapReport,
};
pub use self::redis::RedisQueueBackend;
pub use result::{
    Classification, EntityExtraction, FileInfo, PipelineStep, ProcessingResult,
    QualityAssessment, QualityGrade, TextExtraction,
};
pub use retry::{retry_transient, BackoffStrategy, RetryDecision, RetryPolicy};
