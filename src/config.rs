//! Storage configuration and engine selection.
//!
//! `StorageConfig` carries the scalar connection settings for an owned
//! connection pool. When the caller injects an externally-owned pool or
//! client instead, scalar validation is skipped: the injecting caller is
//! responsible for its own connection settings.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Selects the concrete storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Row-oriented time-series engine (Postgres/TimescaleDB family).
    Relational,
    /// Columnar analytical engine (ClickHouse family).
    Columnar,
    /// Reserved for a dedicated search engine backend; not yet implemented.
    Search,
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relational => write!(f, "relational"),
            Self::Columnar => write!(f, "columnar"),
            Self::Search => write!(f, "search"),
        }
    }
}

impl std::str::FromStr for EngineType {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "relational" => Ok(Self::Relational),
            "columnar" => Ok(Self::Columnar),
            "search" => Ok(Self::Search),
            other => Err(StorageError::EngineUnsupported(other.to_string())),
        }
    }
}

/// Default table name for log records.
pub const DEFAULT_TABLE: &str = "log_records";

/// Connection and schema settings for a storage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: String,
    /// Target table for log records.
    pub table: String,
    /// When true, `initialize()` performs no schema setup; the schema is
    /// declared externally managed.
    pub skip_schema_init: bool,
}

impl StorageConfig {
    /// Loads configuration from `RESERVOIR_DB_*` environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RESERVOIR_DB_HOST` (default: "localhost")
    /// - `RESERVOIR_DB_PORT` (default: 5432)
    /// - `RESERVOIR_DB_NAME` (default: "reservoir")
    /// - `RESERVOIR_DB_USER` (default: "reservoir")
    /// - `RESERVOIR_DB_PASSWORD` (default: "reservoir_dev")
    /// - `RESERVOIR_DB_TABLE` (default: "log_records")
    /// - `RESERVOIR_DB_SKIP_SCHEMA_INIT` (default: false; "1"/"true" enable)
    #[must_use]
    pub fn from_env() -> Self {
        let port = std::env::var("RESERVOIR_DB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432);
        let skip = std::env::var("RESERVOIR_DB_SKIP_SCHEMA_INIT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            host: std::env::var("RESERVOIR_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port,
            database: std::env::var("RESERVOIR_DB_NAME")
                .unwrap_or_else(|_| "reservoir".to_string()),
            username: std::env::var("RESERVOIR_DB_USER")
                .unwrap_or_else(|_| "reservoir".to_string()),
            password: std::env::var("RESERVOIR_DB_PASSWORD")
                .unwrap_or_else(|_| "reservoir_dev".to_string()),
            table: std::env::var("RESERVOIR_DB_TABLE")
                .unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
            skip_schema_init: skip,
        }
    }

    /// Validates scalar connection settings.
    ///
    /// Called by the engine factory unless an external pool/client was
    /// injected; in the injected case only the table name is checked, since
    /// it is interpolated into SQL as an identifier.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first missing field, or an
    /// `InvalidTableName` error when the table is not a safe identifier.
    pub fn validate(&self) -> StorageResult<()> {
        if self.host.is_empty() {
            return Err(StorageError::MissingConfigField("host"));
        }
        if self.database.is_empty() {
            return Err(StorageError::MissingConfigField("database"));
        }
        if self.username.is_empty() {
            return Err(StorageError::MissingConfigField("username"));
        }
        if self.password.is_empty() {
            return Err(StorageError::MissingConfigField("password"));
        }
        self.validate_table()
    }

    /// Validates only the table name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTableName` when the table is not a safe SQL
    /// identifier.
    pub fn validate_table(&self) -> StorageResult<()> {
        if is_safe_identifier(&self.table) {
            Ok(())
        } else {
            Err(StorageError::InvalidTableName(self.table.clone()))
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "reservoir".to_string(),
            username: "reservoir".to_string(),
            password: "reservoir_dev".to_string(),
            table: DEFAULT_TABLE.to_string(),
            skip_schema_init: false,
        }
    }
}

/// Tests whether a string is a plain SQL identifier: `[A-Za-z_]` followed
/// by up to 63 characters of `[A-Za-z0-9_]`.
#[must_use]
pub fn is_safe_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
