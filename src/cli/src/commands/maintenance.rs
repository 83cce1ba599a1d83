//! Manual maintenance commands.

use anyhow::Result;
use clap::Subcommand;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;

use mdus_core::db::{DocumentRepository, PgDocumentRepository};
use mdus_core::maintenance::{ManualCleanupReport, MaintenanceScheduler, TaskKind};
use mdus_core::processing::{DocumentStorage, LocalFileStorage, StorageStats};

use super::{parse_duration, Context};
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Requeue or fail jobs stuck in processing
    ReapStuck {
        /// Processing time after which a job counts as stuck (defaults to the job timeout)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Delete completed and failed jobs older than the retention window
    PurgeOld {
        /// Retention window (defaults to the configured completed-job retention)
        #[arg(long, value_parser = parse_duration)]
        older_than: Option<Duration>,
    },

    /// Run maintenance tasks once, now
    Run {
        /// Tasks to run; temp cleanup, stuck-job reap and old-job purge when omitted
        #[arg(short, long = "task")]
        tasks: Vec<TaskKind>,
    },

    /// Show file counts and sizes for each storage directory
    StorageStats,
}

#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Directory")]
    name: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Files")]
    files: u64,
    #[tabled(rename = "Size (MB)")]
    size_mb: String,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Files")]
    files: u64,
    #[tabled(rename = "Jobs")]
    jobs: u64,
    #[tabled(rename = "Archived")]
    archived: u64,
    #[tabled(rename = "Error")]
    error: String,
}

pub async fn execute(cmd: MaintenanceCommands, ctx: &Context, format: OutputFormat) -> Result<()> {
    match cmd {
        MaintenanceCommands::ReapStuck { timeout } => {
            let timeout = timeout.unwrap_or(ctx.config.processing.job_timeout);
            let report = ctx.queue.reap_stuck(timeout).await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Reaped {} stuck jobs", report.reaped()));
                    output::print_detail("Scanned", &report.scanned.to_string());
                    output::print_detail("Requeued", &report.requeued.to_string());
                    output::print_detail("Failed", &report.failed.to_string());
                    output::print_detail("Skipped", &report.skipped.to_string());
                    output::print_detail("Evicted", &report.evicted.to_string());
                }
                _ => output::print_item(&report, format)?,
            }
        }

        MaintenanceCommands::PurgeOld { older_than } => {
            let retention = older_than.unwrap_or(ctx.config.maintenance.completed_retention);
            let purged = ctx.queue.purge_stale(retention).await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Purged {} jobs", purged));
                }
                _ => output::print_item(&serde_json::json!({ "purged": purged }), format)?,
            }
        }

        MaintenanceCommands::Run { tasks } => {
            let report = run_tasks(ctx, &tasks).await?;
            match format {
                OutputFormat::Table => print_report(&report),
                _ => output::print_item(&report, format)?,
            }
        }

        MaintenanceCommands::StorageStats => {
            let stats = LocalFileStorage::new(&ctx.config.storage)
                .storage_stats()
                .await?;
            match format {
                OutputFormat::Table => print_storage(&stats),
                _ => output::print_item(&stats, format)?,
            }
        }
    }

    Ok(())
}

/// Tasks a manual run executes.
fn selected_tasks(requested: &[TaskKind]) -> Vec<TaskKind> {
    if requested.is_empty() {
        TaskKind::MANUAL_DEFAULT.to_vec()
    } else {
        requested.to_vec()
    }
}

/// Whether retention was asked for but cannot run.
fn retention_unavailable(kinds: &[TaskKind], has_database: bool) -> bool {
    !has_database && kinds.contains(&TaskKind::RetentionEnforcement)
}

async fn run_tasks(ctx: &Context, tasks: &[TaskKind]) -> Result<ManualCleanupReport> {
    let storage: Arc<dyn DocumentStorage> = Arc::new(LocalFileStorage::new(&ctx.config.storage));
    let repository = PgDocumentRepository::connect(&ctx.config.database)
        .await?
        .map(|repo| Arc::new(repo) as Arc<dyn DocumentRepository>);
    let kinds = selected_tasks(tasks);
    if retention_unavailable(&kinds, repository.is_some()) {
        output::print_warning("No database configured; retention enforcement will be skipped");
    }

    let handle = MaintenanceScheduler::with_default_tasks(
        &ctx.config.maintenance,
        ctx.config.processing.job_timeout,
        ctx.queue.clone(),
        storage,
        repository,
    )
    .start();

    let report = handle.run_now(&kinds).await;
    handle.shutdown().await;
    Ok(report)
}

fn print_report(report: &ManualCleanupReport) {
    output::print_header("Maintenance run");
    let rows: Vec<OutcomeRow> = report
        .task_results
        .iter()
        .map(|o| OutcomeRow {
            task: o.task.to_string(),
            status: output::status_colored(o.status.as_str()).to_string(),
            files: o.report.files_cleaned,
            jobs: o.report.jobs_cleaned,
            archived: o.report.documents_archived,
            error: output::or_dash(o.error.as_deref()),
        })
        .collect();
    output::print_table(&rows);

    println!();
    output::print_detail("Tasks run", &report.completed_tasks.to_string());
    output::print_detail("Failed", &report.failed_tasks.to_string());
    output::print_detail("Files cleaned", &report.total_files_cleaned.to_string());
    output::print_detail("Jobs cleaned", &report.total_jobs_cleaned.to_string());
}

fn print_storage(stats: &StorageStats) {
    output::print_header("Storage usage");
    let rows: Vec<UsageRow> = stats
        .directories
        .iter()
        .map(|d| UsageRow {
            name: d.name.clone(),
            path: d.path.display().to_string(),
            files: d.file_count,
            size_mb: if d.exists {
                format!("{:.2}", d.total_size_mb)
            } else {
                "missing".to_string()
            },
        })
        .collect();
    output::print_table(&rows);

    println!();
    output::print_detail("Total files", &stats.totals.total_files.to_string());
    output::print_detail(
        "Total size",
        &format!(
            "{:.2} MB ({:.2} GB)",
            stats.totals.total_size_mb, stats.totals.total_size_gb
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_leaves_documents_alone() {
        let kinds = selected_tasks(&[]);
        assert_eq!(
            kinds,
            vec![TaskKind::TempCleanup, TaskKind::StuckJobReap, TaskKind::OldJobPurge]
        );
        assert!(!retention_unavailable(&kinds, false));
    }

    #[test]
    fn test_named_tasks_run_as_given() {
        let kinds = selected_tasks(&[TaskKind::ArchiveCleanup, TaskKind::RetentionEnforcement]);
        assert_eq!(
            kinds,
            vec![TaskKind::ArchiveCleanup, TaskKind::RetentionEnforcement]
        );
    }

    #[test]
    fn test_retention_without_database_warns() {
        let kinds = selected_tasks(&[TaskKind::RetentionEnforcement]);
        assert!(retention_unavailable(&kinds, false));
        assert!(!retention_unavailable(&kinds, true));
    }
}
