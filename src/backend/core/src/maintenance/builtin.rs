//! Built-in maintenance tasks.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::task::{MaintenanceTask, TaskKind, TaskReport};
use crate::db::DocumentRepository;
use crate::error::Result;
use crate::jobs::JobQueue;
use crate::processing::DocumentStorage;

/// Task: delete temp files past their retention.
pub struct TempCleanupTask {
    storage: Arc<dyn DocumentStorage>,
    retention: Duration,
}

impl TempCleanupTask {
    pub fn new(storage: Arc<dyn DocumentStorage>, retention: Duration) -> Self {
        Self { storage, retention }
    }
}

#[async_trait]
impl MaintenanceTask for TempCleanupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::TempCleanup
    }

    async fn run(&self) -> Result<TaskReport> {
        let files_cleaned = self.storage.cleanup_temp(self.retention).await?;
        Ok(TaskReport {
            files_cleaned,
            ..TaskReport::default()
        })
    }
}

/// Task: return jobs in-flight past the timeout to the retry path.
pub struct StuckJobReapTask {
    queue: JobQueue,
    timeout: Duration,
}

impl StuckJobReapTask {
    pub fn new(queue: JobQueue, timeout: Duration) -> Self {
        Self { queue, timeout }
    }
}

#[async_trait]
impl MaintenanceTask for StuckJobReapTask {
    fn kind(&self) -> TaskKind {
        TaskKind::StuckJobReap
    }

    async fn run(&self) -> Result<TaskReport> {
        let report = self.queue.reap_stuck(self.timeout).await?;
        Ok(TaskReport {
            jobs_cleaned: report.reaped(),
            ..TaskReport::default()
        })
    }
}

/// Task: archive documents whose retention date has passed.
///
/// One batch per run; a document that fails to archive is logged and
/// picked up again by the next run.
pub struct RetentionEnforcementTask {
    repository: Arc<dyn DocumentRepository>,
    storage: Arc<dyn DocumentStorage>,
    batch_size: i64,
}

impl RetentionEnforcementTask {
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        storage: Arc<dyn DocumentStorage>,
        batch_size: i64,
    ) -> Self {
        Self {
            repository,
            storage,
            batch_size,
        }
    }
}

#[async_trait]
impl MaintenanceTask for RetentionEnforcementTask {
    fn kind(&self) -> TaskKind {
        TaskKind::RetentionEnforcement
    }

    async fn run(&self) -> Result<TaskReport> {
        let expired = self
            .repository
            .list_retention_expired(self.batch_size)
            .await?;

        let mut archived = 0;
        for doc in expired {
            let archive_path = match self.storage.archive(&doc.file_path, doc.id).await {
                Ok(path) => path,
                Err(e) => {
                    tracing::error!(document_id = doc.id, error = %e, "Failed to archive document");
                    continue;
                }
            };
            match self
                .repository
                .mark_archived(doc.id, &archive_path.to_string_lossy())
                .await
            {
                Ok(()) => archived += 1,
                Err(e) => {
                    // Put the file back so the row still points at it and the
                    // next run retries the whole move.
                    tracing::error!(
                        document_id = doc.id,
                        path = %archive_path.display(),
                        error = %e,
                        "Archived file but could not update document; restoring"
                    );
                    if let Err(e) = self.storage.restore(&archive_path, &doc.file_path).await {
                        tracing::error!(
                            document_id = doc.id,
                            path = %archive_path.display(),
                            error = %e,
                            "Failed to restore archived file"
                        );
                    }
                }
            }
        }

        tracing::info!(archived, "Retention policy enforcement completed");
        Ok(TaskReport {
            documents_archived: archived,
            ..TaskReport::default()
        })
    }
}

/// Task: delete completed and failed jobs past the retention window.
pub struct OldJobPurgeTask {
    queue: JobQueue,
    retention: Duration,
}

impl OldJobPurgeTask {
    pub fn new(queue: JobQueue, retention: Duration) -> Self {
        Self { queue, retention }
    }
}

#[async_trait]
impl MaintenanceTask for OldJobPurgeTask {
    fn kind(&self) -> TaskKind {
        TaskKind::OldJobPurge
    }

    async fn run(&self) -> Result<TaskReport> {
        let jobs_cleaned = self.queue.purge_stale(self.retention).await?;
        Ok(TaskReport {
            jobs_cleaned,
            ..TaskReport::default()
        })
    }
}

/// Task: delete archived files past the archive retention.
pub struct ArchiveCleanupTask {
    storage: Arc<dyn DocumentStorage>,
    retention: Duration,
}

impl ArchiveCleanupTask {
    pub fn new(storage: Arc<dyn DocumentStorage>, retention: Duration) -> Self {
        Self { storage, retention }
    }
}

#[async_trait]
impl MaintenanceTask for ArchiveCleanupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::ArchiveCleanup
    }

    async fn run(&self) -> Result<TaskReport> {
        let files_cleaned = self.storage.cleanup_archive(self.retention).await?;
        Ok(TaskReport {
            files_cleaned,
            ..TaskReport::default()
        })
    }
}
