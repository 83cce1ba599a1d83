//! Structured logging with JSON/pretty/compact formats.
//!
//! Every job-scoped event carries a `job_id` field; filter on it in the log
//! backend to follow one document through the queue, the pipeline and the
//! maintenance sweeps.

use crate::config::ObservabilityConfig;
use opentelemetry_sdk::trace::Tracer;
use serde::Deserialize;
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse a format name, falling back to JSON for anything unrecognized.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "compact" | "text" => Self::Compact,
            _ => Self::Json,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Global log level or filter directive
    pub level: String,

    pub format: LogFormat,

    /// Per-module overrides, e.g. `mdus_core::jobs::redis = "debug"`
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    pub include_location: bool,

    /// Whether to include target (module path)
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            module_levels: default_module_levels(),
            include_location: false,
            include_target: true,
        }
    }
}

impl From<&ObservabilityConfig> for LoggingConfig {
    fn from(config: &ObservabilityConfig) -> Self {
        Self {
            level: config.log_level.clone(),
            format: LogFormat::parse(&config.log_format),
            ..Self::default()
        }
    }
}

fn default_module_levels() -> HashMap<String, String> {
    // The HTTP and Postgres drivers are chatty at info.
    HashMap::from([
        ("hyper".to_string(), "warn".to_string()),
        ("sqlx".to_string(), "warn".to_string()),
    ])
}

/// Initialize the logging subsystem.
///
/// `RUST_LOG` wins over the configured level when set. When a tracer is
/// given, spans are also exported through it.
pub fn init_logging(config: &LoggingConfig, tracer: Option<Tracer>) -> anyhow::Result<()> {
    let mut filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::try_new(&config.level)?,
    };

    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(directive.parse()?);
    }

    let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(otel_layer)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(otel_layer)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(otel_layer)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}
