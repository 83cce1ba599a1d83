//! Maintenance task contract and run outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MdusError, Result};

/// The recurring housekeeping tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TempCleanup,
    StuckJobReap,
    RetentionEnforcement,
    OldJobPurge,
    ArchiveCleanup,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::TempCleanup,
        TaskKind::StuckJobReap,
        TaskKind::RetentionEnforcement,
        TaskKind::OldJobPurge,
        TaskKind::ArchiveCleanup,
    ];

    /// What a manual run does when no task is named. Retention and archive
    /// cleanup touch documents, so they only run when asked for.
    pub const MANUAL_DEFAULT: [TaskKind; 3] = [
        TaskKind::TempCleanup,
        TaskKind::StuckJobReap,
        TaskKind::OldJobPurge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TempCleanup => "temp_cleanup",
            Self::StuckJobReap => "stuck_job_reap",
            Self::RetentionEnforcement => "retention_enforcement",
            Self::OldJobPurge => "old_job_purge",
            Self::ArchiveCleanup => "archive_cleanup",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = MdusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MdusError::configuration(format!("Unknown maintenance task: {}", s)))
    }
}

/// What one task run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub files_cleaned: u64,
    pub jobs_cleaned: u64,
    pub documents_archived: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    /// Not started because the previous run had not finished
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Record of one task run, kept in the scheduler history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task: TaskKind,
    pub status: RunStatus,
    #[serde(flatten)]
    pub report: TaskReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A recurring housekeeping task.
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn run(&self) -> Result<TaskReport>;
}
