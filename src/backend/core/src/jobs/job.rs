//! Job definitions.
//!
//! This module provides the record the queue moves between its indices:
//!
//! - **JobId**: opaque identifier for one processing job
//! - **JobStatus**: the four-state lifecycle and its legal transitions
//! - **DocumentType**: the open set of document kinds the pipeline branches on
//! - **Job**: the full record kept in the job store
//! - **Lease**: proof that the holder owns the job's current in-flight attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::result::ProcessingResult;
use crate::error::{MdusError, Result};

/// Identifier of a document in the metadata store.
pub type DocumentId = i64;

/// Lowest priority a job may carry. Retry demotion saturates here.
pub const MIN_PRIORITY: i32 = -4096;

/// Highest priority a job may carry.
pub const MAX_PRIORITY: i32 = 4096;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = MdusError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| MdusError::job_not_found(s))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the pending index
    Queued,
    /// Held in-flight by an executor
    Processing,
    /// Finished; terminal
    Completed,
    /// Retries exhausted; terminal
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Queued)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Document Type
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of document a job processes.
///
/// Serialized as its snake_case name. Names the pipeline does not branch on
/// are kept verbatim in `Named`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocumentType {
    MedicalReport,
    Prescription,
    LaboratoryResult,
    Other,
    Unknown,
    Named(String),
}

impl DocumentType {
    /// Types the pipeline sends to the classifier first.
    pub fn needs_classification(&self) -> bool {
        matches!(self, Self::Other | Self::Unknown)
    }

    /// Types that get medical entity extraction.
    pub fn is_structured_medical(&self) -> bool {
        matches!(
            self,
            Self::MedicalReport | Self::Prescription | Self::LaboratoryResult
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::MedicalReport => "medical_report",
            Self::Prescription => "prescription",
            Self::LaboratoryResult => "laboratory_result",
            Self::Other => "other",
            Self::Unknown => "unknown",
            Self::Named(name) => name,
        }
    }
}

impl Default for DocumentType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<String> for DocumentType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "medical_report" => Self::MedicalReport,
            "prescription" => Self::Prescription,
            "laboratory_result" => Self::LaboratoryResult,
            "other" => Self::Other,
            "unknown" | "" => Self::Unknown,
            _ => Self::Named(s),
        }
    }
}

impl From<&str> for DocumentType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<DocumentType> for String {
    fn from(t: DocumentType) -> Self {
        match t {
            DocumentType::Named(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lease
// ═══════════════════════════════════════════════════════════════════════════════

/// Ownership of one in-flight attempt of a job.
///
/// Handed out by dequeue. Acknowledgements and requeues are only applied
/// while the job is still in-flight under the same `attempt`; once the
/// reaper has recovered the job and someone else dequeued it, an old lease
/// no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: JobId,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// The full state of one job, as kept in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub document_id: DocumentId,
    /// Path or URI of the input artifact
    pub source_locator: String,
    pub document_type: DocumentType,
    pub status: JobStatus,
    /// Higher is more urgent
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Number of times the job has been dequeued; the lease fence
    #[serde(default)]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<ProcessingResult>,
}

impl Job {
    /// Create a queued job.
    pub fn new(
        document_id: DocumentId,
        source_locator: impl Into<String>,
        document_type: DocumentType,
        priority: i32,
        max_retries: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            document_id,
            source_locator: source_locator.into(),
            document_type,
            status: JobStatus::Queued,
            priority,
            retry_count: 0,
            max_retries,
            attempt: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// The lease for the current in-flight attempt, if the job is in-flight.
    pub fn lease(&self) -> Option<Lease> {
        match (self.status, self.started_at) {
            (JobStatus::Processing, Some(started_at)) => Some(Lease {
                job_id: self.id,
                attempt: self.attempt,
                started_at,
            }),
            _ => None,
        }
    }

    /// Whether `lease` names this job's current in-flight attempt.
    pub fn is_held_by(&self, lease: &Lease) -> bool {
        self.id == lease.job_id
            && self.status == JobStatus::Processing
            && self.attempt == lease.attempt
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MdusError::invalid_transition(self.status, next));
        }
        self.status = next;
        Ok(())
    }

    /// Queued -> Processing, opening a new attempt.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<Lease> {
        self.transition(JobStatus::Processing)?;
        self.attempt += 1;
        self.started_at = Some(now);
        self.completed_at = None;
        Ok(Lease {
            job_id: self.id,
            attempt: self.attempt,
            started_at: now,
        })
    }

    /// Processing -> Completed.
    pub fn mark_completed(&mut self, result: ProcessingResult, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(now);
        self.result = Some(result);
        Ok(())
    }

    /// Processing -> Queued after a failed attempt, one priority step lower.
    pub fn mark_retry(&mut self, error: impl Into<String>, new_priority: i32) -> Result<()> {
        self.transition(JobStatus::Queued)?;
        self.error = Some(error.into());
        self.priority = new_priority;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// Processing -> Failed once retries are exhausted.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status View
// ═══════════════════════════════════════════════════════════════════════════════

/// What a status reader sees for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<ProcessingResult>,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            document_id: job.document_id,
            document_type: job.document_type,
            status: job.status,
            priority: job.priority,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error,
            result: job.result,
        }
    }
}
