//! Log record data model.
//!
//! Defines the severity enumeration and the core `LogRecord` /
//! `StoredLogRecord` structures shared by every storage engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Debug information.
    Debug,
    /// Informational messages.
    Info,
    /// Warning conditions.
    Warn,
    /// Error conditions.
    Error,
    /// Critical conditions.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

impl Severity {
    /// Parses a severity stored in a database row.
    ///
    /// Unknown values fall back to `Info` rather than failing the whole
    /// query: stored rows are trusted, and a lossy read beats an unreadable
    /// page.
    #[must_use]
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "debug" => Self::Debug,
            "warn" => Self::Warn,
            "error" => Self::Error,
            "critical" => Self::Critical,
            _ => Self::Info,
        }
    }

    /// All severity levels, lowest first.
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Debug,
            Self::Info,
            Self::Warn,
            Self::Error,
            Self::Critical,
        ]
    }
}

/// A log record handed to the storage layer for ingestion.
///
/// Records are immutable once stored and are only ever removed by explicit
/// time-range deletion.
///
/// # Example
///
/// ```
/// use reservoir::models::{LogRecord, Severity};
///
/// let record = LogRecord::new("acme", "checkout", "payments", Severity::Error, "charge declined")
///     .with_metadata("card_network", "visa")
///     .with_trace_id("trace-abc");
///
/// assert!(record.validate_record().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogRecord {
    /// Timestamp when the log event occurred.
    pub timestamp: DateTime<Utc>,

    /// Tenant/organization the record belongs to.
    #[validate(length(min = 1, message = "Organization id cannot be empty"))]
    pub org_id: String,

    /// Project within the organization.
    #[validate(length(min = 1, message = "Project id cannot be empty"))]
    pub project_id: String,

    /// Name of the service that emitted the log.
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service: String,

    /// Severity level.
    #[serde(default)]
    pub level: Severity,

    /// The log message content.
    #[validate(length(min = 1, message = "Message cannot be empty"))]
    pub message: String,

    /// Additional structured key-value metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Optional trace id for distributed tracing correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Optional span id for distributed tracing correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

/// Errors that can occur during log record validation.
#[derive(Debug, Error)]
pub enum RecordValidationError {
    /// The log message is empty.
    #[error("Log message cannot be empty")]
    EmptyMessage,

    /// The service name is empty.
    #[error("Service name cannot be empty")]
    EmptyService,

    /// The organization id is empty.
    #[error("Organization id cannot be empty")]
    EmptyOrg,

    /// The project id is empty.
    #[error("Project id cannot be empty")]
    EmptyProject,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl LogRecord {
    /// Creates a new log record with the current timestamp.
    #[must_use]
    pub fn new(
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        service: impl Into<String>,
        level: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            org_id: org_id.into(),
            project_id: project_id.into(),
            service: service.into(),
            level,
            message: message.into(),
            metadata: HashMap::new(),
            trace_id: None,
            span_id: None,
        }
    }

    /// Sets the event timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a metadata entry to the record.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.metadata.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
        self
    }

    /// Sets the trace id for distributed tracing correlation.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Sets the span id for distributed tracing correlation.
    #[must_use]
    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Validates the record before ingestion.
    ///
    /// # Errors
    ///
    /// Returns an error if the message, service, organization id, or
    /// project id is empty.
    pub fn validate_record(&self) -> Result<(), RecordValidationError> {
        if self.message.is_empty() {
            return Err(RecordValidationError::EmptyMessage);
        }
        if self.service.is_empty() {
            return Err(RecordValidationError::EmptyService);
        }
        if self.org_id.is_empty() {
            return Err(RecordValidationError::EmptyOrg);
        }
        if self.project_id.is_empty() {
            return Err(RecordValidationError::EmptyProject);
        }
        self.validate()?;
        Ok(())
    }
}

/// A log record as stored by an engine.
///
/// Identity is the pair `(id, timestamp)`: timestamps alone are not unique,
/// and the generated id alone does not locate the physical partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLogRecord {
    /// Generated unique id assigned at ingestion.
    pub id: Uuid,

    /// The record contents.
    #[serde(flatten)]
    pub record: LogRecord,
}

impl StoredLogRecord {
    /// Pairs a freshly generated id with an accepted record.
    #[must_use]
    pub fn assign(record: LogRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
        }
    }
}
