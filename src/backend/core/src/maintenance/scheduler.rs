//! Maintenance scheduling with interval and time-of-day support.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::builtin::{
    ArchiveCleanupTask, OldJobPurgeTask, RetentionEnforcementTask, StuckJobReapTask,
    TempCleanupTask,
};
use super::task::{MaintenanceTask, RunStatus, TaskKind, TaskOutcome, TaskReport};
use crate::config::MaintenanceConfig;
use crate::db::DocumentRepository;
use crate::jobs::JobQueue;
use crate::processing::DocumentStorage;
use crate::telemetry::MaintenanceMetrics;

/// Outcomes kept for inspection.
const HISTORY_LIMIT: usize = 100;

/// When a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Every `d`, first run one interval after start
    Interval(#[serde(with = "humantime_serde")] Duration),
    /// Once a day at this UTC time
    DailyAt(NaiveTime),
}

impl Schedule {
    /// First fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Interval(every) => {
                let step = ChronoDuration::from_std(*every).unwrap_or_else(|_| ChronoDuration::days(1));
                from + step.max(ChronoDuration::seconds(1))
            }
            Self::DailyAt(at) => {
                let today = Utc.from_utc_datetime(&from.date_naive().and_time(*at));
                if today > from {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }
}

/// Summary of a manual run, one line per task plus totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualCleanupReport {
    /// Tasks that ran, whatever their status
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_files_cleaned: u64,
    pub total_jobs_cleaned: u64,
    pub task_results: Vec<TaskOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl ManualCleanupReport {
    fn from_outcomes(task_results: Vec<TaskOutcome>) -> Self {
        Self {
            completed_tasks: task_results.len(),
            failed_tasks: task_results
                .iter()
                .filter(|o| o.status == RunStatus::Failed)
                .count(),
            total_files_cleaned: task_results.iter().map(|o| o.report.files_cleaned).sum(),
            total_jobs_cleaned: task_results.iter().map(|o| o.report.jobs_cleaned).sum(),
            task_results,
            timestamp: Utc::now(),
        }
    }
}

struct Registered {
    task: Arc<dyn MaintenanceTask>,
    schedule: Schedule,
    running: Arc<AtomicBool>,
}

/// State shared by the tick loop, spawned runs and the handle.
struct Shared {
    tasks: Vec<Registered>,
    history: Mutex<VecDeque<TaskOutcome>>,
}

impl Shared {
    fn find(&self, kind: TaskKind) -> Option<&Registered> {
        self.tasks.iter().find(|r| r.task.kind() == kind)
    }

    fn record(&self, outcome: TaskOutcome) {
        MaintenanceMetrics::record_run(outcome.task.as_str(), outcome.status.as_str());
        let mut history = self.history.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(outcome);
    }
}

/// Run `task` unless its previous run is still going.
///
/// The in-progress flag is cleared even if the task panics.
async fn run_guarded(shared: &Shared, index: usize) -> TaskOutcome {
    let registered = &shared.tasks[index];
    let kind = registered.task.kind();
    let started_at = Utc::now();

    if registered
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        tracing::info!(task = %kind, "Previous run still in progress, skipping");
        let outcome = TaskOutcome {
            task: kind,
            status: RunStatus::Skipped,
            report: TaskReport::default(),
            error: Some("Task already running".to_string()),
            started_at,
            finished_at: started_at,
        };
        shared.record(outcome.clone());
        return outcome;
    }

    struct Release<'a>(&'a AtomicBool);
    impl Drop for Release<'_> {
        fn drop(&mut self) {
            self.0.store(false, Ordering::Release);
        }
    }
    let _release = Release(&registered.running);

    tracing::info!(task = %kind, "Starting maintenance task");
    let result = registered.task.run().await;
    let finished_at = Utc::now();

    let outcome = match result {
        Ok(report) => {
            tracing::info!(
                task = %kind,
                files_cleaned = report.files_cleaned,
                jobs_cleaned = report.jobs_cleaned,
                documents_archived = report.documents_archived,
                "Maintenance task completed"
            );
            TaskOutcome {
                task: kind,
                status: RunStatus::Completed,
                report,
                error: None,
                started_at,
                finished_at,
            }
        }
        Err(e) => {
            e.log();
            tracing::error!(task = %kind, error = %e, "Maintenance task failed");
            TaskOutcome {
                task: kind,
                status: RunStatus::Failed,
                report: TaskReport::default(),
                error: Some(e.to_string()),
                started_at,
                finished_at,
            }
        }
    };
    shared.record(outcome.clone());
    outcome
}

/// Maintenance scheduler firing registered tasks on their schedules.
pub struct MaintenanceScheduler {
    tick: Duration,
    tasks: Vec<Registered>,
}

impl MaintenanceScheduler {
    /// Create a new scheduler that checks for due tasks every `tick`.
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            tasks: Vec::new(),
        }
    }

    /// Register a task. A later registration of the same kind replaces it.
    pub fn register(mut self, task: Arc<dyn MaintenanceTask>, schedule: Schedule) -> Self {
        self.tasks.retain(|r| r.task.kind() != task.kind());
        self.tasks.push(Registered {
            task,
            schedule,
            running: Arc::new(AtomicBool::new(false)),
        });
        self
    }

    /// The standard task set and schedules.
    ///
    /// Retention enforcement is only registered when a metadata store is
    /// available.
    pub fn with_default_tasks(
        config: &MaintenanceConfig,
        job_timeout: Duration,
        queue: JobQueue,
        storage: Arc<dyn DocumentStorage>,
        repository: Option<Arc<dyn DocumentRepository>>,
    ) -> Self {
        let mut scheduler = Self::new(config.tick_interval)
            .register(
                Arc::new(TempCleanupTask::new(storage.clone(), config.temp_retention)),
                Schedule::Interval(config.temp_cleanup_every),
            )
            .register(
                Arc::new(StuckJobReapTask::new(queue.clone(), job_timeout)),
                Schedule::Interval(config.stuck_reap_every),
            )
            .register(
                Arc::new(OldJobPurgeTask::new(queue, config.completed_retention)),
                Schedule::DailyAt(config.purge_at),
            )
            .register(
                Arc::new(ArchiveCleanupTask::new(storage.clone(), config.archive_retention)),
                Schedule::Interval(config.archive_cleanup_every),
            );

        match repository {
            Some(repository) => {
                scheduler = scheduler.register(
                    Arc::new(RetentionEnforcementTask::new(
                        repository,
                        storage,
                        config.retention_batch_size,
                    )),
                    Schedule::DailyAt(config.retention_at),
                );
            }
            None => {
                tracing::warn!("No metadata store configured; retention enforcement disabled");
            }
        }
        scheduler
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.tasks.iter().map(|r| r.task.kind()).collect()
    }

    /// Start the tick loop, returning a handle for control.
    pub fn start(self) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tick = self.tick.max(Duration::from_millis(1));
        let now = Utc::now();
        let mut next_runs: Vec<DateTime<Utc>> =
            self.tasks.iter().map(|r| r.schedule.next_after(now)).collect();
        let schedules: Vec<Schedule> = self.tasks.iter().map(|r| r.schedule).collect();

        let shared = Arc::new(Shared {
            tasks: self.tasks,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        });

        let loop_shared = shared.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(
                tasks = loop_shared.tasks.len(),
                tick_secs = tick.as_secs(),
                "Maintenance scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        for index in due(&schedules, &mut next_runs, Utc::now()) {
                            let shared = loop_shared.clone();
                            tokio::spawn(async move {
                                run_guarded(&shared, index).await;
                            });
                        }
                    }
                }
            }

            tracing::info!("Maintenance scheduler stopped");
        });

        MaintenanceHandle {
            shutdown: shutdown_tx,
            shared,
            ticker,
        }
    }
}

/// Indices of tasks due at `now`; advances their next run time.
fn due(schedules: &[Schedule], next_runs: &mut [DateTime<Utc>], now: DateTime<Utc>) -> Vec<usize> {
    let mut fired = Vec::new();
    for (index, next) in next_runs.iter_mut().enumerate() {
        if *next <= now {
            *next = schedules[index].next_after(now);
            fired.push(index);
        }
    }
    fired
}

/// Handle for controlling a running scheduler.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    shared: Arc<Shared>,
    ticker: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Run the selected tasks now, one after another.
    ///
    /// Kinds that are not registered are ignored. A task that is already
    /// running is reported as skipped.
    pub async fn run_now(&self, kinds: &[TaskKind]) -> ManualCleanupReport {
        tracing::info!(?kinds, "Starting manual cleanup");
        let mut outcomes = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let Some(index) = self.shared.tasks.iter().position(|r| r.task.kind() == *kind) else {
                tracing::warn!(task = %kind, "Maintenance task not registered");
                continue;
            };
            outcomes.push(run_guarded(&self.shared, index).await);
        }
        ManualCleanupReport::from_outcomes(outcomes)
    }

    /// Most recent outcomes, oldest first.
    pub fn history(&self) -> Vec<TaskOutcome> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// Whether a run of `kind` is in progress.
    pub fn is_running(&self, kind: TaskKind) -> bool {
        self.shared
            .find(kind)
            .map(|r| r.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Stop the tick loop. Runs already started are left to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.ticker.await {
            tracing::error!(error = %e, "Maintenance scheduler panicked");
        }
    }
}
