//! MDUS Worker - Main entry point
//!
//! Runs the document processor and the maintenance scheduler against the
//! Redis job queue until SIGINT/SIGTERM.

use std::sync::Arc;

use clap::Parser;

use mdus_core::{
    config::Config,
    db::{DocumentRepository, PgDocumentRepository},
    jobs::JobQueue,
    maintenance::MaintenanceScheduler,
    processing::{
        DocumentProcessor, DocumentStorage, HttpInferenceClient, LocalFileStorage, Pipeline,
        ProcessorConfig,
    },
    telemetry,
};

#[derive(Parser, Debug)]
#[command(name = "mdus-worker", version, about = "MDUS document processing worker")]
struct Args {
    /// Configuration file (TOML, YAML or JSON); environment overrides it
    #[arg(short, long, env = "MDUS_CONFIG")]
    config: Option<String>,

    /// Run only the document processor
    #[arg(long)]
    no_maintenance: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    let telemetry = telemetry::init_telemetry(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting MDUS worker");

    // Job queue
    let queue = JobQueue::redis(&config.redis, config.processing.retry_attempts)?;
    match queue.stats().await {
        Ok(stats) => tracing::info!(
            pending = stats.pending,
            processing = stats.processing,
            "Connected to job queue"
        ),
        Err(e) => tracing::warn!(error = %e, "Job queue not reachable yet; will keep retrying"),
    }

    // Collaborators
    let storage: Arc<dyn DocumentStorage> = Arc::new(LocalFileStorage::new(&config.storage));
    let inference = HttpInferenceClient::new(&config.inference)?;
    if !inference.health_check().await {
        tracing::warn!(
            base_url = %config.inference.base_url,
            "Inference service health check failed; steps will degrade until it is up"
        );
    }

    let repository: Option<Arc<dyn DocumentRepository>> =
        match PgDocumentRepository::connect(&config.database).await? {
            Some(repo) => {
                tracing::info!("Connected to metadata store");
                Some(Arc::new(repo))
            }
            None => None,
        };

    // Worker pool
    let pipeline = Pipeline::new(Arc::new(inference), storage.clone());
    let processor = DocumentProcessor::new(
        queue.clone(),
        pipeline,
        ProcessorConfig::from(&config.processing),
    )
    .start();

    // Maintenance
    let maintenance = if args.no_maintenance {
        None
    } else {
        Some(
            MaintenanceScheduler::with_default_tasks(
                &config.maintenance,
                config.processing.job_timeout,
                queue.clone(),
                storage,
                repository,
            )
            .start(),
        )
    };

    shutdown_signal().await;

    if let Some(maintenance) = maintenance {
        maintenance.shutdown().await;
    }
    let stats = processor.stats().clone();
    processor.shutdown().await;

    tracing::info!(
        processed = stats.processed(),
        succeeded = stats.succeeded(),
        failed = stats.failed(),
        "Worker shutdown complete"
    );
    telemetry.shutdown();

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
