//! Error types for the storage layer.
//!
//! Errors fall into four groups with different recovery semantics:
//!
//! - **Configuration** errors are fatal at construction time and are never
//!   retried (missing connection fields, unknown or unimplemented engine
//!   types, unsafe table names).
//! - **Lifecycle** errors mean an operation was invoked in the wrong engine
//!   state; the caller recovers by calling `initialize()` first.
//! - **Validation** errors are raised before any native query is sent to the
//!   underlying engine, so a rejected request never partially executes.
//! - **Engine** errors come from the underlying database driver and are
//!   propagated unmodified; retry policy belongs to the caller.

use thiserror::Error;

use crate::config::EngineType;

/// Errors produced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    // --- Configuration ---
    /// A required connection field is missing or empty and no external
    /// pool/client was injected.
    #[error("Missing required connection field `{0}`")]
    MissingConfigField(&'static str),

    /// The configured table name is not a safe SQL identifier.
    #[error("Invalid table name `{0}`: expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidTableName(String),

    /// The engine type string did not parse to any known engine.
    #[error("Unsupported engine type `{0}`")]
    EngineUnsupported(String),

    /// The engine type is recognized but has no implementation yet.
    #[error("Engine type `{0}` is not yet implemented")]
    EngineNotImplemented(EngineType),

    // --- Lifecycle ---
    /// A data operation was invoked before `initialize()` succeeded.
    ///
    /// This is a programming error on the caller's side, not a transient
    /// failure: the engine never attempts a lazy connect.
    #[error("Storage engine is not initialized; call initialize() first")]
    NotInitialized,

    /// A data operation was invoked after `disconnect()`.
    #[error("Storage engine has been closed")]
    Closed,

    // --- Validation ---
    /// A dynamic field name is neither an allow-listed column nor a
    /// well-formed `metadata.<key>` reference.
    #[error("Invalid field name `{0}`")]
    InvalidFieldName(String),

    /// The requested page size is zero or above the supported maximum.
    #[error("Invalid limit {0}: must be between 1 and {max}", max = crate::translate::MAX_QUERY_LIMIT)]
    InvalidLimit(u64),

    /// An array-valued filter was empty.
    ///
    /// An empty array would silently match zero rows and mask caller
    /// mistakes, so it is rejected instead.
    #[error("Empty array for filter `{0}`")]
    EmptyArrayFilter(&'static str),

    /// A record failed validation before ingestion.
    #[error("Invalid log record: {0}")]
    InvalidRecord(#[from] crate::models::RecordValidationError),

    /// An ingest batch exceeds the engine's maximum batch size.
    #[error("Batch of {size} records exceeds engine maximum of {max}")]
    BatchTooLarge {
        /// Number of records in the rejected batch.
        size: usize,
        /// Maximum batch size supported by the engine.
        max: usize,
    },

    /// The requested migration version is not known to the engine.
    #[error("Unknown schema migration version {0}")]
    UnknownMigration(u32),

    // --- Engine ---
    /// Failed to acquire a lock on the in-memory store.
    #[error("Failed to acquire lock on in-memory store")]
    Lock,

    /// The relational engine rejected or failed a query.
    #[error("Relational engine error: {0}")]
    Relational(#[from] sqlx::Error),

    /// The columnar engine rejected or failed a query.
    #[error("Columnar engine error: {0}")]
    Columnar(#[from] clickhouse::error::Error),
}

/// Convenience alias used throughout the crate.
pub type StorageResult<T> = Result<T, StorageError>;
