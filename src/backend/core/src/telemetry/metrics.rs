//! Prometheus metrics for the queue, the worker pool and maintenance.
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`init_metrics`] installs the Prometheus recorder. Tests and
//! the CLI never install it.
//!
//! # Example
//!
//! ```rust,no_run
//! use mdus_core::telemetry::metrics::JobMetrics;
//!
//! JobMetrics::record_enqueued("prescription");
//! JobMetrics::record_step_failure("classification");
//! ```

use crate::config::ObservabilityConfig;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,

    /// Scrape listener address (e.g., "0.0.0.0:9090")
    pub endpoint: String,

    /// Histogram buckets for job durations (in seconds)
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "0.0.0.0:9090".to_string(),
            duration_buckets: default_duration_buckets(),
        }
    }
}

impl From<&ObservabilityConfig> for MetricsConfig {
    fn from(config: &ObservabilityConfig) -> Self {
        Self {
            enabled: config.metrics_enabled,
            endpoint: config.metrics_endpoint.clone(),
            duration_buckets: default_duration_buckets(),
        }
    }
}

fn default_duration_buckets() -> Vec<f64> {
    // Pipelines wait on OCR; durations run from seconds to many minutes.
    vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
}

/// Handle onto the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder and start the scrape listener.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry {
            prometheus_handle: None,
        });
    }

    let addr: SocketAddr = config.endpoint.parse()?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(&config.duration_buckets)?
        .build()?;

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| anyhow::anyhow!("a metrics recorder is already installed"))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    register_metric_descriptions();

    tracing::info!(endpoint = %addr, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    // Queue metrics
    describe_counter!("mdus_jobs_enqueued_total", "Jobs admitted to the pending index");
    describe_counter!("mdus_jobs_completed_total", "Jobs that reached Completed");
    describe_counter!("mdus_jobs_failed_total", "Jobs that reached Failed");
    describe_counter!("mdus_jobs_retried_total", "Jobs requeued after a failure");
    describe_counter!("mdus_jobs_reaped_total", "Stuck jobs recovered by maintenance");
    describe_counter!("mdus_jobs_purged_total", "Terminal job records purged");
    describe_gauge!("mdus_queue_depth", "Job ids per queue index");

    // Worker metrics
    describe_gauge!("mdus_active_jobs", "Executors currently running a pipeline");
    describe_histogram!("mdus_job_duration_seconds", "Pipeline duration in seconds");
    describe_counter!(
        "mdus_pipeline_step_failures_total",
        "Pipeline steps that degraded to an empty result"
    );

    // Maintenance metrics
    describe_counter!("mdus_maintenance_runs_total", "Maintenance task runs by outcome");

    describe_counter!("mdus_errors_total", "Errors by code and category");
}

/// Job lifecycle metrics.
pub struct JobMetrics;

impl JobMetrics {
    pub fn record_enqueued(document_type: &str) {
        counter!(
            "mdus_jobs_enqueued_total",
            "document_type" => document_type.to_string(),
        )
        .increment(1);
    }

    /// Record a completed pipeline and how long it took.
    pub fn record_completed(duration_seconds: f64) {
        counter!("mdus_jobs_completed_total").increment(1);
        histogram!("mdus_job_duration_seconds").record(duration_seconds);
    }

    pub fn record_failed() {
        counter!("mdus_jobs_failed_total").increment(1);
    }

    pub fn record_retried() {
        counter!("mdus_jobs_retried_total").increment(1);
    }

    pub fn record_reaped(count: u64) {
        counter!("mdus_jobs_reaped_total").increment(count);
    }

    pub fn record_purged(count: u64) {
        counter!("mdus_jobs_purged_total").increment(count);
    }

    pub fn record_step_failure(step: &'static str) {
        counter!("mdus_pipeline_step_failures_total", "step" => step).increment(1);
    }

    pub fn set_active_jobs(active: u64) {
        gauge!("mdus_active_jobs").set(active as f64);
    }

    pub fn set_queue_depth(index: &'static str, depth: u64) {
        gauge!("mdus_queue_depth", "index" => index).set(depth as f64);
    }
}

/// Maintenance task metrics.
pub struct MaintenanceMetrics;

impl MaintenanceMetrics {
    pub fn record_run(task: &'static str, status: &'static str) {
        counter!(
            "mdus_maintenance_runs_total",
            "task" => task,
            "status" => status,
        )
        .increment(1);
    }
}
