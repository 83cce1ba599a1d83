//! Telemetry: logging, tracing and metrics for the processing backbone.
//!
//! - **Logging**: structured JSON/pretty/compact output through `tracing-subscriber`
//! - **Tracing**: optional OTLP span export
//! - **Metrics**: Prometheus scrape endpoint fed by the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use mdus_core::config::Config;
//! use mdus_core::telemetry::init_telemetry;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let telemetry = init_telemetry(&config.observability)?;
//! // ...
//! telemetry.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, JobMetrics, MaintenanceMetrics, MetricsConfig, MetricsRegistry};
pub use tracing::{build_otlp_tracer, shutdown_tracing};

use crate::config::ObservabilityConfig;

/// Initialize the complete telemetry stack.
///
/// Must be called from inside a tokio runtime: both the OTLP batch exporter
/// and the Prometheus listener spawn onto it.
pub fn init_telemetry(config: &ObservabilityConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&MetricsConfig::from(config))?;

    let tracer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(build_otlp_tracer(&config.service_name, endpoint)?),
        None => None,
    };
    let exporting = tracer.is_some();

    init_logging(&LoggingConfig::from(config), tracer)?;

    ::tracing::info!(
        service_name = %config.service_name,
        otlp = exporting,
        metrics = config.metrics_enabled,
        "Telemetry initialized"
    );

    Ok(TelemetryHandle { metrics, exporting })
}

/// Handle for managing telemetry lifecycle.
pub struct TelemetryHandle {
    /// Metrics handle for rendering the registry
    pub metrics: MetricsRegistry,
    exporting: bool,
}

impl TelemetryHandle {
    /// Flush remaining spans.
    pub fn shutdown(self) {
        if self.exporting {
            shutdown_tracing();
        }
        ::tracing::info!("Telemetry shutdown complete");
    }
}
