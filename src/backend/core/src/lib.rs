#![allow(clippy::result_large_err)]
//! # MDUS Core
//!
//! Processing backbone of the medical document upload service.
//!
//! ## Architecture
//!
//! - **Jobs**: job store and priority queue, Redis-backed with an in-memory twin
//! - **Processing**: worker pool running each document through the pipeline
//! - **Maintenance**: scheduler for cleanup, stuck-job reaping and retention
//! - **Db**: document metadata store used by retention enforcement
//! - **Telemetry**: structured logging, OTLP tracing and Prometheus metrics

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod maintenance;
pub mod processing;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, MdusError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::db::{DocumentRepository, PgDocumentRepository, RetentionCandidate};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, MdusError, Result};
    pub use crate::jobs::{
        DocumentId, DocumentType, FailureOutcome, InMemoryQueueBackend, Job, JobId, JobQueue,
        JobStatus, JobStatusView, Lease, ProcessingResult, QueueBackend, QueueStats, ReapReport,
        RedisQueueBackend,
    };
    pub use crate::maintenance::{
        MaintenanceHandle, MaintenanceScheduler, MaintenanceTask, ManualCleanupReport, Schedule,
        TaskKind, TaskOutcome,
    };
    pub use crate::processing::{
        DocumentProcessor, DocumentStorage, HttpInferenceClient, InferenceClient,
        LocalFileStorage, Pipeline, ProcessorConfig, ProcessorHandle,
    };
}
