//! Integration tests for the maintenance scheduler and built-in tasks.
//!
//! Tests cover:
//! - Manual runs of the default task set
//! - Retention enforcement with per-document failures
//! - Restoring files whose archive could not be recorded
//! - The manual default task set
//! - Storage usage across every root
//! - Task failure isolation
//! - Overlap protection for long-running tasks
//! - Scheduled firing and bounded history

mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use common::{complete_aged, FakeRepository, Sandbox};
use mdus_core::config::MaintenanceConfig;
use mdus_core::db::{DocumentRepository, RetentionCandidate};
use mdus_core::error::Result;
use mdus_core::jobs::{DocumentType, JobQueue, JobStatus, QueueBackend};
use mdus_core::maintenance::{
    MaintenanceScheduler, MaintenanceTask, RunStatus, Schedule, TaskKind, TaskReport,
};
use mdus_core::processing::DocumentStorage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn candidate(id: i64, file_path: String) -> RetentionCandidate {
    RetentionCandidate {
        id,
        file_path,
        retention_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
    }
}

fn config() -> MaintenanceConfig {
    MaintenanceConfig {
        temp_retention: Duration::ZERO,
        ..MaintenanceConfig::default()
    }
}

fn write_temp(sandbox: &Sandbox, name: &str) {
    let path = sandbox.config.temp_dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"scratch").unwrap();
}

/// Counts runs; optionally blocks until released.
struct GatedTask {
    kind: TaskKind,
    runs: AtomicUsize,
    started: Notify,
    release: Option<Notify>,
}

impl GatedTask {
    fn instant(kind: TaskKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            runs: AtomicUsize::new(0),
            started: Notify::new(),
            release: None,
        })
    }

    fn gated(kind: TaskKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            runs: AtomicUsize::new(0),
            started: Notify::new(),
            release: Some(Notify::new()),
        })
    }
}

#[async_trait]
impl MaintenanceTask for GatedTask {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn run(&self) -> Result<TaskReport> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Some(release) = &self.release {
            release.notified().await;
        }
        Ok(TaskReport {
            files_cleaned: 1,
            ..TaskReport::default()
        })
    }
}

// ============================================================================
// Default Task Set Tests
// ============================================================================

#[tokio::test]
async fn test_run_now_runs_every_default_task() {
    let sandbox = Sandbox::new();
    write_temp(&sandbox, "a.tmp");
    write_temp(&sandbox, "nested/b.tmp");

    let queue = JobQueue::in_memory();
    queue
        .enqueue(1, "/uploads/stuck.pdf", DocumentType::Other, 0)
        .await
        .unwrap();
    let stuck = queue
        .backend()
        .dequeue(Utc::now() - ChronoDuration::hours(2))
        .await
        .unwrap()
        .unwrap()
        .id;
    queue
        .enqueue(2, "/uploads/old.pdf", DocumentType::Other, 0)
        .await
        .unwrap();
    let old = complete_aged(&queue, ChronoDuration::days(30)).await;

    let repository = Arc::new(FakeRepository::with_expired(vec![
        candidate(501, sandbox.upload("501.pdf", b"one")),
        candidate(502, sandbox.upload("502.pdf", b"two")),
    ]));

    tokio::time::sleep(Duration::from_millis(20)).await;

    let handle = MaintenanceScheduler::with_default_tasks(
        &config(),
        Duration::from_secs(30 * 60),
        queue.clone(),
        sandbox.storage(),
        Some(repository.clone() as Arc<dyn DocumentRepository>),
    )
    .start();

    let report = handle.run_now(&TaskKind::ALL).await;
    handle.shutdown().await;

    assert_eq!(report.task_results.len(), 5);
    assert_eq!(report.completed_tasks, 5);
    assert_eq!(report.failed_tasks, 0);
    assert_eq!(report.total_files_cleaned, 2);
    assert_eq!(report.total_jobs_cleaned, 2);

    let retention = report
        .task_results
        .iter()
        .find(|o| o.task == TaskKind::RetentionEnforcement)
        .unwrap();
    assert_eq!(retention.report.documents_archived, 2);

    assert_eq!(queue.status_of(stuck).await.unwrap(), JobStatus::Queued);
    assert!(queue.get_status(old).await.is_err());

    let archived = repository.archived.lock().clone();
    assert_eq!(archived.len(), 2);
    for (id, path) in archived {
        assert!(path.contains(&format!("archive/{}/", id)));
        assert!(std::path::Path::new(&path).exists());
    }
}

#[tokio::test]
async fn test_retention_is_skipped_without_metadata_store() {
    let sandbox = Sandbox::new();
    let scheduler = MaintenanceScheduler::with_default_tasks(
        &config(),
        Duration::from_secs(60),
        JobQueue::in_memory(),
        sandbox.storage(),
        None,
    );

    let kinds = scheduler.kinds();
    assert_eq!(kinds.len(), 4);
    assert!(!kinds.contains(&TaskKind::RetentionEnforcement));

    let handle = scheduler.start();
    let report = handle.run_now(&[TaskKind::RetentionEnforcement]).await;
    handle.shutdown().await;

    assert!(report.task_results.is_empty());
    assert_eq!(report.completed_tasks, 0);
}

#[tokio::test]
async fn test_retention_continues_past_bad_documents() {
    let sandbox = Sandbox::new();
    let missing = sandbox.path_in("uploads", "missing.pdf");
    let repository = Arc::new(FakeRepository::with_expired(vec![
        candidate(601, sandbox.upload("601.pdf", b"ok")),
        candidate(602, missing.to_string_lossy().into_owned()),
        candidate(603, sandbox.upload("603.pdf", b"rejected")),
    ]));
    repository.reject_mark.lock().insert(603);

    let handle = MaintenanceScheduler::with_default_tasks(
        &config(),
        Duration::from_secs(60),
        JobQueue::in_memory(),
        sandbox.storage(),
        Some(repository.clone() as Arc<dyn DocumentRepository>),
    )
    .start();

    let report = handle.run_now(&[TaskKind::RetentionEnforcement]).await;
    handle.shutdown().await;

    let outcome = &report.task_results[0];
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.report.documents_archived, 1);

    let archived = repository.archived.lock();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].0, 601);
}

#[tokio::test]
async fn test_rejected_archive_is_restored_and_retried() {
    let sandbox = Sandbox::new();
    let original = sandbox.upload("604.pdf", b"kept");
    let repository = Arc::new(FakeRepository::with_expired(vec![candidate(
        604,
        original.clone(),
    )]));
    repository.reject_mark.lock().insert(604);

    let handle = MaintenanceScheduler::with_default_tasks(
        &config(),
        Duration::from_secs(60),
        JobQueue::in_memory(),
        sandbox.storage(),
        Some(repository.clone() as Arc<dyn DocumentRepository>),
    )
    .start();

    let first = handle.run_now(&[TaskKind::RetentionEnforcement]).await;
    assert_eq!(first.task_results[0].report.documents_archived, 0);
    assert!(std::path::Path::new(&original).exists());
    let stats = sandbox.storage().storage_stats().await.unwrap();
    assert_eq!(stats.directory("archive").unwrap().file_count, 0);

    repository.reject_mark.lock().clear();
    let second = handle.run_now(&[TaskKind::RetentionEnforcement]).await;
    handle.shutdown().await;

    assert_eq!(second.task_results[0].report.documents_archived, 1);
    assert!(!std::path::Path::new(&original).exists());
    let archived = repository.archived.lock();
    assert_eq!(archived.len(), 1);
    assert!(std::path::Path::new(&archived[0].1).exists());
}

#[tokio::test]
async fn test_manual_default_set_leaves_documents_alone() {
    let sandbox = Sandbox::new();
    write_temp(&sandbox, "scratch.tmp");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let original = sandbox.upload("605.pdf", b"expired");
    let repository = Arc::new(FakeRepository::with_expired(vec![candidate(
        605,
        original.clone(),
    )]));

    let handle = MaintenanceScheduler::with_default_tasks(
        &config(),
        Duration::from_secs(60),
        JobQueue::in_memory(),
        sandbox.storage(),
        Some(repository.clone() as Arc<dyn DocumentRepository>),
    )
    .start();
    let report = handle.run_now(&TaskKind::MANUAL_DEFAULT).await;
    handle.shutdown().await;

    let ran: Vec<TaskKind> = report.task_results.iter().map(|o| o.task).collect();
    assert_eq!(
        ran,
        vec![TaskKind::TempCleanup, TaskKind::StuckJobReap, TaskKind::OldJobPurge]
    );
    assert_eq!(report.total_files_cleaned, 1);
    assert!(std::path::Path::new(&original).exists());
    assert!(repository.archived.lock().is_empty());
}

// ============================================================================
// Storage Stats Tests
// ============================================================================

#[tokio::test]
async fn test_storage_stats_covers_every_root() {
    let sandbox = Sandbox::new();
    sandbox.upload("a.pdf", &[0u8; 2048]);
    sandbox.upload("b.pdf", b"abcd");
    write_temp(&sandbox, "nested/scratch.tmp");
    let processed = sandbox.path_in("processed", "7/done.pdf");
    std::fs::create_dir_all(processed.parent().unwrap()).unwrap();
    std::fs::write(&processed, vec![1u8; 1024 * 1024]).unwrap();

    let stats = sandbox.storage().storage_stats().await.unwrap();
    let names: Vec<&str> = stats.directories.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["uploads", "processed", "temp", "archive"]);

    let uploads = stats.directory("uploads").unwrap();
    assert_eq!(uploads.file_count, 2);
    assert_eq!(uploads.total_size_bytes, 2052);
    assert_eq!(uploads.path, sandbox.config.upload_dir);

    let processed = stats.directory("processed").unwrap();
    assert_eq!(processed.file_count, 1);
    assert_eq!(processed.total_size_mb, 1.0);

    assert_eq!(stats.directory("temp").unwrap().file_count, 1);
    let archive = stats.directory("archive").unwrap();
    assert!(!archive.exists);
    assert_eq!(archive.file_count, 0);

    assert_eq!(stats.totals.total_files, 4);
    assert_eq!(stats.totals.total_size_bytes, 2052 + 7 + 1024 * 1024);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["totals"]["total_files"], 4);
    assert_eq!(json["directories"][0]["name"], "uploads");
}

#[tokio::test]
async fn test_failing_task_does_not_stop_the_others() {
    let sandbox = Sandbox::new();
    write_temp(&sandbox, "left-over.tmp");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let repository = Arc::new(FakeRepository {
        unavailable: true,
        ..FakeRepository::default()
    });

    let handle = MaintenanceScheduler::with_default_tasks(
        &config(),
        Duration::from_secs(60),
        JobQueue::in_memory(),
        sandbox.storage(),
        Some(repository as Arc<dyn DocumentRepository>),
    )
    .start();

    let report = handle
        .run_now(&[TaskKind::RetentionEnforcement, TaskKind::TempCleanup])
        .await;
    handle.shutdown().await;

    assert_eq!(report.completed_tasks, 2);
    assert_eq!(report.failed_tasks, 1);
    assert_eq!(report.total_files_cleaned, 1);

    let failed = &report.task_results[0];
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("connection refused"));
    assert_eq!(report.task_results[1].status, RunStatus::Completed);
}

// ============================================================================
// Scheduling Tests
// ============================================================================

#[tokio::test]
async fn test_busy_task_is_skipped_not_overlapped() {
    let task = GatedTask::gated(TaskKind::StuckJobReap);
    let handle = Arc::new(
        MaintenanceScheduler::new(Duration::from_secs(60))
            .register(task.clone(), Schedule::Interval(Duration::from_secs(3600)))
            .start(),
    );

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.run_now(&[TaskKind::StuckJobReap]).await })
    };
    task.started.notified().await;
    assert!(handle.is_running(TaskKind::StuckJobReap));

    let second = handle.run_now(&[TaskKind::StuckJobReap]).await;
    assert_eq!(second.task_results[0].status, RunStatus::Skipped);
    assert_eq!(second.failed_tasks, 0);

    task.release.as_ref().unwrap().notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.task_results[0].status, RunStatus::Completed);
    assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    assert!(!handle.is_running(TaskKind::StuckJobReap));

    let history = handle.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, RunStatus::Skipped);
    assert_eq!(history[1].status, RunStatus::Completed);
}

#[tokio::test]
async fn test_interval_task_fires_from_tick_loop() {
    let task = GatedTask::instant(TaskKind::TempCleanup);
    let handle = MaintenanceScheduler::new(Duration::from_millis(20))
        .register(task.clone(), Schedule::Interval(Duration::from_secs(1)))
        .start();

    tokio::time::timeout(Duration::from_secs(5), task.started.notified())
        .await
        .expect("task fired");
    handle.shutdown().await;

    assert!(task.runs.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let task = GatedTask::instant(TaskKind::ArchiveCleanup);
    let handle = MaintenanceScheduler::new(Duration::from_secs(60))
        .register(task.clone(), Schedule::Interval(Duration::from_secs(3600)))
        .start();

    for _ in 0..120 {
        handle.run_now(&[TaskKind::ArchiveCleanup]).await;
    }

    let history = handle.history();
    assert_eq!(history.len(), 100);
    assert!(history.iter().all(|o| o.task == TaskKind::ArchiveCleanup));
    assert_eq!(task.runs.load(Ordering::SeqCst), 120);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_tick_loop() {
    let task = GatedTask::instant(TaskKind::OldJobPurge);
    let handle = MaintenanceScheduler::new(Duration::from_millis(10))
        .register(task.clone(), Schedule::Interval(Duration::from_secs(1)))
        .start();
    handle.shutdown().await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(task.runs.load(Ordering::SeqCst), 0);
}
