//! Queue inspection commands.

use anyhow::Result;
use clap::Subcommand;
use tabled::Tabled;

use mdus_core::jobs::QueueStats;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show index sizes and lifetime totals
    Stats,
}

#[derive(Tabled)]
struct IndexRow {
    #[tabled(rename = "Index")]
    index: &'static str,
    #[tabled(rename = "Jobs")]
    jobs: u64,
    #[tabled(rename = "Lifetime total")]
    total: String,
}

fn rows(stats: &QueueStats) -> Vec<IndexRow> {
    vec![
        IndexRow {
            index: "pending",
            jobs: stats.pending,
            total: format!("{} queued", stats.totals.queued),
        },
        IndexRow {
            index: "processing",
            jobs: stats.processing,
            total: "-".to_string(),
        },
        IndexRow {
            index: "completed",
            jobs: stats.completed,
            total: stats.totals.completed.to_string(),
        },
        IndexRow {
            index: "failed",
            jobs: stats.failed,
            total: stats.totals.failed.to_string(),
        },
    ]
}

pub async fn execute(cmd: QueueCommands, ctx: &Context, format: OutputFormat) -> Result<()> {
    match cmd {
        QueueCommands::Stats => {
            let stats = ctx.queue.stats().await?;
            match format {
                OutputFormat::Table => output::print_table(&rows(&stats)),
                _ => output::print_item(&stats, format)?,
            }
        }
    }
    Ok(())
}
