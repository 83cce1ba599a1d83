//! MDUS CLI - operator command line for the document processing queue.
//!
//! Talks to the Redis-backed job queue directly through `mdus-core`.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{job, maintenance, queue, Context};
use output::OutputFormat;

/// MDUS - Medical Document Upload Service
#[derive(Parser)]
#[command(
    name = "mdus",
    version,
    about = "MDUS document processing queue",
    long_about = "Enqueue documents, inspect jobs and queue depth, and run maintenance sweeps.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML, YAML or JSON); environment overrides it
    #[arg(short, long, global = true, env = "MDUS_CONFIG")]
    config: Option<String>,

    /// Redis URL, overriding the configuration
    #[arg(long, global = true, env = "MDUS_REDIS_URL")]
    redis_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Queue inspection
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Manual maintenance sweeps
    #[command(subcommand)]
    Maintenance(maintenance::MaintenanceCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = match Context::load(cli.config.as_deref(), cli.redis_url) {
        Ok(ctx) => match cli.command {
            Commands::Job(cmd) => job::execute(cmd, &ctx, format).await,
            Commands::Queue(cmd) => queue::execute(cmd, &ctx, format).await,
            Commands::Maintenance(cmd) => maintenance::execute(cmd, &ctx, format).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
