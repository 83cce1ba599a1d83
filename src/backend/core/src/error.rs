//! Error handling for the MDUS processing backbone.
//!
//! This module provides:
//! - A single crate-wide error type with context and chaining
//! - Stable error codes for machine-readable reporting (CLI, logs)
//! - User-facing messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use mdus_core::error::{MdusError, Result, ErrorContext, ErrorCode};
//!
//! async fn load(path: &Path) -> Result<Vec<u8>> {
//!     tokio::fs::read(path)
//!         .await
//!         .with_error_code(ErrorCode::ArtifactMissing)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for MDUS operations.
pub type Result<T> = std::result::Result<T, MdusError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and show up in logs, metrics labels and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    InvalidStateTransition,
    JobNotInFlight,
    InvalidPriority,

    // Store Errors (2000-2099)
    StoreUnavailable,
    StoreError,
    RecordExpired,

    // Artifact Errors (2100-2199)
    ArtifactMissing,
    StorageError,

    // Metadata Errors (2200-2299)
    DatabaseError,

    // Inference Errors (3000-3099)
    InferenceError,
    InferenceTimeout,
    InferenceUnavailable,

    // Serialization Errors (4000-4099)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,
    MissingConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobNotFound => 1000,
            Self::InvalidStateTransition => 1001,
            Self::JobNotInFlight => 1002,
            Self::InvalidPriority => 1003,

            Self::StoreUnavailable => 2000,
            Self::StoreError => 2001,
            Self::RecordExpired => 2002,

            Self::ArtifactMissing => 2100,
            Self::StorageError => 2101,

            Self::DatabaseError => 2200,

            Self::InferenceError => 3000,
            Self::InferenceTimeout => 3001,
            Self::InferenceUnavailable => 3002,

            Self::SerializationError => 4000,
            Self::DeserializationError => 4001,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,
            Self::MissingConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Transient infrastructure errors worth retrying at the call site.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable
                | Self::StoreError
                | Self::InferenceTimeout
                | Self::InferenceUnavailable
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            2000..=2099 => "store",
            2100..=2199 => "artifact",
            2200..=2299 => "metadata",
            3000..=3099 => "inference",
            4000..=4099 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (unknown job, bad priority, stale lease)
    Low,
    /// Operational issues (inference timeouts, missing artifacts)
    Medium,
    /// System errors (store failures, corrupt records)
    High,
    /// Errors that prevent the process from running at all
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::JobNotFound
            | ErrorCode::InvalidStateTransition
            | ErrorCode::JobNotInFlight
            | ErrorCode::InvalidPriority
            | ErrorCode::RecordExpired => Self::Low,

            ErrorCode::ArtifactMissing
            | ErrorCode::InferenceError
            | ErrorCode::InferenceTimeout
            | ErrorCode::InferenceUnavailable => Self::Medium,

            ErrorCode::StoreUnavailable
            | ErrorCode::StoreError
            | ErrorCode::StorageError
            | ErrorCode::DatabaseError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError => Self::High,

            ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::MissingConfiguration
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured context attached to an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Entity kind the error refers to (e.g. "job", "document")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Identifier of that entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Free-form key/value context
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The crate-wide error type.
#[derive(Error)]
pub struct MdusError {
    code: ErrorCode,
    user_message: Cow<'static, str>,
    internal_message: Option<String>,
    details: ErrorDetails,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Debug for MdusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdusError")
            .field("code", &self.code)
            .field("user_message", &self.user_message)
            .field("internal_message", &self.internal_message)
            .field("details", &self.details)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for MdusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl MdusError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with the given code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a job not found error.
    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        let id = job_id.to_string();
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("job", id))
    }

    /// The job is not in-flight under the lease the caller presented.
    pub fn not_in_flight(job_id: impl fmt::Display) -> Self {
        let id = job_id.to_string();
        Self::new(
            ErrorCode::JobNotInFlight,
            format!("Job is not in-flight under this lease: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("job", id))
    }

    /// Create an invalid state transition error.
    pub fn invalid_transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid job state transition: {:?} -> {:?}", from, to),
        )
        .with_context("from_state", format!("{:?}", from))
        .with_context("to_state", format!("{:?}", to))
    }

    /// The persistent form of a store failure, after internal retries gave up.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StoreUnavailable,
            "Job store is unavailable",
            message,
        )
    }

    /// Create an artifact missing error.
    pub fn artifact_missing(locator: impl Into<String>) -> Self {
        let locator = locator.into();
        Self::new(
            ErrorCode::ArtifactMissing,
            format!("Source artifact not found: {}", locator),
        )
        .with_context("locator", &locator)
    }

    /// Create an inference error for a named endpoint.
    pub fn inference(endpoint: &'static str, message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InferenceError,
            format!("Inference call failed: {}", endpoint),
            message,
        )
        .with_context("endpoint", endpoint)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "mdus_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to foreign errors.
pub trait ErrorContext<T> {
    /// Wrap the error as an internal error with a message.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error with a specific error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| MdusError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| MdusError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| MdusError::new(ErrorCode::JobNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| MdusError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for MdusError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::StoreUnavailable, "Unable to connect to job store")
        } else if error.is_timeout() {
            (ErrorCode::StoreError, "Job store operation timed out")
        } else if error.is_io_error() {
            (ErrorCode::StoreError, "Job store I/O failure")
        } else {
            // Script errors, type errors and the like will not heal on retry.
            (ErrorCode::InternalError, "Job store rejected the operation")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for MdusError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for MdusError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() {
            (ErrorCode::InferenceTimeout, "Inference request timed out")
        } else if error.is_connect() {
            (ErrorCode::InferenceUnavailable, "Failed to connect to inference service")
        } else if error.is_decode() {
            (ErrorCode::DeserializationError, "Malformed inference response")
        } else {
            (ErrorCode::InferenceError, "Inference request failed")
        };

        let mut err = Self::with_internal(code, user_msg, error.to_string());
        if let Some(status) = error.status() {
            err = err.with_context("status", status.as_u16());
        }
        err.with_source(error)
    }
}

impl From<sqlx::Error> for MdusError {
    fn from(error: sqlx::Error) -> Self {
        let user_msg = match &error {
            sqlx::Error::RowNotFound => "The requested document was not found",
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                "Unable to connect to the metadata store"
            }
            _ => "A metadata store error occurred",
        };

        Self::with_internal(ErrorCode::DatabaseError, user_msg, error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for MdusError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::InferenceTimeout,
            "Operation timed out",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<std::io::Error> for MdusError {
    fn from(error: std::io::Error) -> Self {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::ArtifactMissing,
            _ => ErrorCode::StorageError,
        };

        Self::with_internal(code, "A storage I/O error occurred", error.to_string())
            .with_source(error)
    }
}

impl From<anyhow::Error> for MdusError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<MdusError>() {
            Ok(mdus) => mdus,
            Err(other) => Self::internal(format!("{:#}", other)),
        }
    }
}

impl From<config::ConfigError> for MdusError {
    fn from(error: config::ConfigError) -> Self {
        let code = match &error {
            config::ConfigError::NotFound(_) => ErrorCode::MissingConfiguration,
            config::ConfigError::Type { .. } => ErrorCode::InvalidConfiguration,
            _ => ErrorCode::ConfigurationError,
        };

        Self::with_internal(code, "Configuration error", error.to_string()).with_source(error)
    }
}
