//! Job commands: enqueue a document, read a job's status.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;

use mdus_core::jobs::{DocumentId, DocumentType, JobId, JobStatusView};

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Queue a document for processing
    Enqueue {
        /// Document ID in the metadata store
        #[arg(long)]
        document_id: DocumentId,

        /// Path or URI of the uploaded file
        #[arg(long)]
        path: String,

        /// Document type (e.g. prescription, medical_report); unknown types are classified first
        #[arg(long = "type", default_value = "unknown")]
        document_type: String,

        /// Higher runs first
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,
    },

    /// Show a job's status
    Status {
        /// Job ID
        job_id: JobId,
    },
}

#[derive(Serialize)]
struct Enqueued {
    job_id: JobId,
    document_id: DocumentId,
    document_type: DocumentType,
    priority: i32,
}

pub async fn execute(cmd: JobCommands, ctx: &Context, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Enqueue {
            document_id,
            path,
            document_type,
            priority,
        } => {
            let document_type = DocumentType::from(document_type);
            let job_id = ctx
                .queue
                .enqueue(document_id, path, document_type.clone(), priority)
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success("Job queued");
                    output::print_detail("Job ID", &job_id.to_string());
                    output::print_detail("Document", &document_id.to_string());
                    output::print_detail("Type", document_type.as_str());
                    output::print_detail("Priority", &priority.to_string());
                }
                _ => output::print_item(
                    &Enqueued {
                        job_id,
                        document_id,
                        document_type,
                        priority,
                    },
                    format,
                )?,
            }
        }

        JobCommands::Status { job_id } => {
            let view = ctx.queue.get_status(job_id).await?;
            match format {
                OutputFormat::Table => print_status(&view),
                _ => output::print_item(&view, format)?,
            }
        }
    }

    Ok(())
}

fn print_status(view: &JobStatusView) {
    output::print_header(&format!("Job: {}", view.job_id));
    println!(
        "  {}: {}",
        "Status".cyan(),
        output::status_colored(view.status.as_str())
    );
    output::print_detail("Document", &view.document_id.to_string());
    output::print_detail("Type", view.document_type.as_str());
    output::print_detail("Priority", &view.priority.to_string());
    output::print_detail(
        "Retries",
        &format!("{}/{}", view.retry_count, view.max_retries),
    );
    output::print_detail("Created", &view.created_at.to_rfc3339());
    output::print_detail("Started", &output::or_dash(view.started_at.map(|t| t.to_rfc3339())));
    output::print_detail(
        "Completed",
        &output::or_dash(view.completed_at.map(|t| t.to_rfc3339())),
    );
    if let Some(error) = &view.error {
        output::print_detail("Error", error);
    }
    if let Some(result) = &view.result {
        output::print_detail("Detected type", result.document_type.as_str());
        output::print_detail("Confidence", &format!("{:.2}", result.confidence_score));
        if let Some(quality) = &result.quality_assessment {
            output::print_detail(
                "Quality",
                &format!("{:.2} ({:?})", quality.quality_score, quality.assessment),
            );
        }
        output::print_detail("Processing time", &format!("{:.1}s", result.processing_time_seconds));
    }
}
