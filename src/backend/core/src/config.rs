//! Configuration management.
//!
//! Values are layered: built-in defaults, then an optional file, then
//! environment variables prefixed with `MDUS` (`MDUS__PROCESSING__MAX_CONCURRENT_JOBS=8`).
//! Durations are written in humantime form (`"30m"`, `"7d"`).

use crate::error::{MdusError, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Queue backend configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Metadata store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Inference endpoint configuration
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Local blob storage roots
    #[serde(default)]
    pub storage: StorageConfig,

    /// Maintenance scheduler configuration
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for every key the backend writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry ceiling for job records, refreshed on every write
    #[serde(default = "default_record_ttl", with = "humantime_serde")]
    pub record_ttl: Duration,

    /// Internal retries on transient store errors
    #[serde(default = "default_store_retry_attempts")]
    pub retry_attempts: u32,

    /// First retry delay; doubled per attempt
    #[serde(default = "default_store_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            record_ttl: default_record_ttl(),
            retry_attempts: default_store_retry_attempts(),
            retry_backoff: default_store_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Retention enforcement is disabled without it.
    pub url: Option<String>,

    /// Maximum pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Worker pool size
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// In-flight age after which a job counts as stuck
    #[serde(default = "default_job_timeout", with = "humantime_serde")]
    pub job_timeout: Duration,

    /// `max_retries` stamped on newly enqueued jobs
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Idle wait when the queue is empty
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Wait after an unexpected queue error
    #[serde(default = "default_error_backoff", with = "humantime_serde")]
    pub error_backoff: Duration,

    /// Upper bound on draining executors at shutdown
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout: default_job_timeout(),
            retry_attempts: default_retry_attempts(),
            poll_interval: default_poll_interval(),
            error_backoff: default_error_backoff(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the AI service
    #[serde(default = "default_inference_url")]
    pub base_url: String,

    /// Per-call timeout
    #[serde(default = "default_inference_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_url(),
            timeout: default_inference_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            processed_dir: default_processed_dir(),
            temp_dir: default_temp_dir(),
            archive_dir: default_archive_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// How often the scheduler checks for due tasks
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Temp files older than this are deleted
    #[serde(default = "default_temp_retention", with = "humantime_serde")]
    pub temp_retention: Duration,

    /// Terminal job records older than this are purged
    #[serde(default = "default_completed_retention", with = "humantime_serde")]
    pub completed_retention: Duration,

    /// Archived files older than this are deleted
    #[serde(default = "default_archive_retention", with = "humantime_serde")]
    pub archive_retention: Duration,

    /// Documents handled per retention sweep
    #[serde(default = "default_retention_batch_size")]
    pub retention_batch_size: i64,

    #[serde(default = "default_temp_cleanup_every", with = "humantime_serde")]
    pub temp_cleanup_every: Duration,

    #[serde(default = "default_stuck_reap_every", with = "humantime_serde")]
    pub stuck_reap_every: Duration,

    #[serde(default = "default_archive_cleanup_every", with = "humantime_serde")]
    pub archive_cleanup_every: Duration,

    /// UTC wall-clock time for retention enforcement
    #[serde(default = "default_retention_at")]
    pub retention_at: NaiveTime,

    /// UTC wall-clock time for the old-job purge
    #[serde(default = "default_purge_at")]
    pub purge_at: NaiveTime,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            temp_retention: default_temp_retention(),
            completed_retention: default_completed_retention(),
            archive_retention: default_archive_retention(),
            retention_batch_size: default_retention_batch_size(),
            temp_cleanup_every: default_temp_cleanup_every(),
            stuck_reap_every: default_stuck_reap_every(),
            archive_cleanup_every: default_archive_cleanup_every(),
            retention_at: default_retention_at(),
            purge_at: default_purge_at(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Service name reported to the trace backend
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json, pretty or compact
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Expose a Prometheus scrape endpoint
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    /// Listen address for the scrape endpoint
    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_enabled: default_metrics_enabled(),
            metrics_endpoint: default_metrics_endpoint(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "mdus".to_string() }
fn default_record_ttl() -> Duration { Duration::from_secs(24 * 3600) }
fn default_store_retry_attempts() -> u32 { 3 }
fn default_store_retry_backoff() -> Duration { Duration::from_millis(100) }
fn default_max_connections() -> u32 { 5 }
fn default_max_concurrent_jobs() -> usize { 5 }
fn default_job_timeout() -> Duration { Duration::from_secs(30 * 60) }
fn default_retry_attempts() -> u32 { 3 }
fn default_poll_interval() -> Duration { Duration::from_secs(5) }
fn default_error_backoff() -> Duration { Duration::from_secs(10) }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(60) }
fn default_inference_url() -> String { "http://ai_service:8000".to_string() }
fn default_inference_timeout() -> Duration { Duration::from_secs(300) }
fn default_upload_dir() -> PathBuf { PathBuf::from("/app/uploads") }
fn default_processed_dir() -> PathBuf { PathBuf::from("/app/processed") }
fn default_temp_dir() -> PathBuf { PathBuf::from("/app/temp") }
fn default_archive_dir() -> PathBuf { PathBuf::from("/app/archive") }
fn default_tick_interval() -> Duration { Duration::from_secs(60) }
fn default_temp_retention() -> Duration { Duration::from_secs(24 * 3600) }
fn default_completed_retention() -> Duration { Duration::from_secs(7 * 24 * 3600) }
fn default_archive_retention() -> Duration { Duration::from_secs(365 * 24 * 3600) }
fn default_retention_batch_size() -> i64 { 100 }
fn default_temp_cleanup_every() -> Duration { Duration::from_secs(3600) }
fn default_stuck_reap_every() -> Duration { Duration::from_secs(6 * 3600) }
fn default_archive_cleanup_every() -> Duration { Duration::from_secs(7 * 24 * 3600) }
fn default_retention_at() -> NaiveTime { NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default() }
fn default_purge_at() -> NaiveTime { NaiveTime::from_hms_opt(3, 0, 0).unwrap_or_default() }
fn default_service_name() -> String { "mdus-worker".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_metrics_enabled() -> bool { true }
fn default_metrics_endpoint() -> String { "0.0.0.0:9090".to_string() }

const ENV_PREFIX: &str = "MDUS";

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(Self::environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(Self::environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.processing.max_concurrent_jobs == 0 {
            return Err(MdusError::configuration(
                "processing.max_concurrent_jobs must be at least 1",
            ));
        }
        if self.maintenance.tick_interval.is_zero() {
            return Err(MdusError::configuration(
                "maintenance.tick_interval must be greater than zero",
            ));
        }
        if self.processing.retry_attempts > 100 {
            return Err(MdusError::configuration(
                "processing.retry_attempts must not exceed 100",
            ));
        }
        if self.maintenance.retention_batch_size <= 0 {
            return Err(MdusError::configuration(
                "maintenance.retention_batch_size must be positive",
            ));
        }
        Ok(())
    }
}
