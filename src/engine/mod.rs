//! Storage engine contract and shared engine plumbing.
//!
//! Every engine moves through the same lifecycle:
//!
//! ```text
//! Unconnected --connect()--> Connected --initialize()--> Ready --disconnect()--> Closed
//! ```
//!
//! Data operations are only valid in the Ready state; calling one earlier
//! is a programming error and fails fast with a distinct "not initialized"
//! condition instead of attempting a lazy connect. `capabilities()` is
//! valid in every state: it describes the engine type, not a live
//! connection.

pub mod columnar;
pub mod factory;
pub mod memory;
pub mod relational;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::EngineType;
use crate::cursor::Cursor;
use crate::error::{StorageError, StorageResult};
use crate::models::{
    AggregateParams, AggregateResult, DeleteParams, DistinctParams, LogRecord, QueryParams,
    QueryResult, RecordFilter, StoredLogRecord, TimeRange, TopValuesParams, ValueCount,
};

/// Lifecycle state of a storage engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Constructed, no pool or client established.
    Unconnected = 0,
    /// Pool/client established, schema not yet ensured.
    Connected = 1,
    /// Fully initialized; data operations are valid.
    Ready = 2,
    /// Disconnected; the instance will not be reused.
    Closed = 3,
}

/// Atomic holder for an engine's lifecycle state.
///
/// This is the only mutable state an engine shares across operations
/// besides its (internally thread-safe) pool.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(EngineState::Unconnected as u8))
    }

    pub(crate) fn load(&self) -> EngineState {
        match self.0.load(Ordering::Acquire) {
            0 => EngineState::Unconnected,
            1 => EngineState::Connected,
            2 => EngineState::Ready,
            _ => EngineState::Closed,
        }
    }

    pub(crate) fn store(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Gate for data operations.
    pub(crate) fn ensure_ready(&self) -> StorageResult<()> {
        match self.load() {
            EngineState::Ready => Ok(()),
            EngineState::Closed => Err(StorageError::Closed),
            EngineState::Unconnected | EngineState::Connected => {
                Err(StorageError::NotInitialized)
            }
        }
    }
}

/// Static capability descriptor for an engine type.
///
/// Queryable before `initialize()` succeeds: capabilities are a property
/// of the engine type, not of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Whether the engine supports indexed full-text search.
    pub full_text_search: bool,
    /// Whether ingest batches run inside a transaction.
    pub transactional_batches: bool,
    /// Whether deletions are immediately visible to subsequent queries.
    ///
    /// The columnar engine applies deletions as asynchronous mutations;
    /// callers that need read-your-deletes must check this flag.
    pub synchronous_deletes: bool,
    /// Maximum accepted ingest batch size.
    pub max_batch_size: usize,
}

impl EngineCapabilities {
    /// Capability descriptor for an engine type.
    #[must_use]
    pub const fn for_engine(engine: EngineType) -> Self {
        match engine {
            EngineType::Relational => Self {
                full_text_search: true,
                transactional_batches: true,
                synchronous_deletes: true,
                max_batch_size: 1_000,
            },
            EngineType::Columnar => Self {
                full_text_search: true,
                transactional_batches: false,
                synchronous_deletes: false,
                max_batch_size: 100_000,
            },
            EngineType::Search => Self {
                full_text_search: true,
                transactional_batches: false,
                synchronous_deletes: false,
                max_batch_size: 500,
            },
        }
    }
}

/// Outcome of a health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the engine answered the probe.
    pub healthy: bool,
    /// Human-readable detail when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthStatus {
    /// A healthy status.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    /// An unhealthy status with detail.
    #[must_use]
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// Outcome of an ingest call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    /// Number of records durably stored. The batch is atomic: this is
    /// either the full batch size or the call failed.
    pub accepted: usize,
}

/// Outcome of an ingest call that returns the stored records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReturningResult {
    /// The stored records with their assigned ids, in input order.
    pub records: Vec<StoredLogRecord>,
}

/// A physical storage partition covering part of a time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSegment {
    /// Engine-native segment name (chunk or part).
    pub name: String,
    /// Earliest timestamp covered.
    pub starts_at: chrono::DateTime<chrono::Utc>,
    /// Latest timestamp covered.
    pub ends_at: chrono::DateTime<chrono::Utc>,
    /// Row count, when the engine reports one.
    pub rows: Option<u64>,
    /// On-disk size in bytes, when the engine reports one.
    pub bytes: Option<u64>,
}

/// The engine-agnostic storage contract.
///
/// Implementations use their translator to build native queries and are
/// responsible for enforcing the lifecycle state machine. They never
/// retry: a failed operation surfaces once, unmodified.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Static capabilities of this engine. Valid in any state.
    fn capabilities(&self) -> EngineCapabilities;

    /// Current lifecycle state.
    fn state(&self) -> EngineState;

    /// Establishes or adopts the connection pool.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the backend is unreachable, or
    /// `Closed` after `disconnect()`.
    async fn connect(&self) -> StorageResult<()>;

    /// Idempotent schema setup. A no-op when the schema is declared
    /// externally managed.
    ///
    /// # Errors
    ///
    /// Returns an engine error when schema statements fail.
    async fn initialize(&self) -> StorageResult<()>;

    /// Applies versioned schema changes up to `version`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMigration` for a version the engine does not know,
    /// or an engine error when a statement fails.
    async fn migrate(&self, version: u32) -> StorageResult<()>;

    /// Releases owned resources. Injected pools are never closed.
    ///
    /// # Errors
    ///
    /// Returns an engine error when shutdown fails; safe to call in any
    /// state and idempotent.
    async fn disconnect(&self) -> StorageResult<()>;

    /// Probes the underlying engine.
    ///
    /// # Errors
    ///
    /// An unreachable backend is reported as an unhealthy status, not an
    /// error.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Stores a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `initialize()`, a validation error
    /// for an invalid or oversized batch, or an engine error.
    async fn ingest(&self, records: Vec<LogRecord>) -> StorageResult<IngestResult>;

    /// Stores a batch atomically and returns the stored records with
    /// their assigned ids, in input order.
    ///
    /// # Errors
    ///
    /// Same error surface as `ingest`.
    async fn ingest_returning(
        &self,
        records: Vec<LogRecord>,
    ) -> StorageResult<IngestReturningResult>;

    /// Runs a filtered, paginated query.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `initialize()`, a validation error
    /// before any SQL is sent, or an engine error.
    async fn query(&self, params: QueryParams) -> StorageResult<QueryResult>;

    /// Runs a time-bucketed aggregation.
    ///
    /// # Errors
    ///
    /// Same error surface as `query`.
    async fn aggregate(&self, params: AggregateParams) -> StorageResult<AggregateResult>;

    /// Counts records matching a filter.
    ///
    /// # Errors
    ///
    /// Same error surface as `query`.
    async fn count(&self, filter: RecordFilter) -> StorageResult<u64>;

    /// Collects distinct values of a validated field.
    ///
    /// # Errors
    ///
    /// Same error surface as `query`, plus `InvalidFieldName` for a field
    /// outside the allow-list.
    async fn distinct(&self, params: DistinctParams) -> StorageResult<Vec<String>>;

    /// Ranks the most frequent values of a validated field.
    ///
    /// # Errors
    ///
    /// Same error surface as `distinct`.
    async fn top_values(&self, params: TopValuesParams) -> StorageResult<Vec<ValueCount>>;

    /// Deletes records in a time range, returning the affected row count.
    ///
    /// # Errors
    ///
    /// Same error surface as `query`.
    async fn delete_by_time_range(&self, params: DeleteParams) -> StorageResult<u64>;

    /// Reports the physical storage segments covering a time range.
    ///
    /// # Errors
    ///
    /// Same error surface as `query`.
    async fn segments(&self, range: TimeRange) -> StorageResult<Vec<StorageSegment>>;
}

/// Validates an ingest batch and assigns ids, preserving input order.
///
/// Runs entirely before any I/O: a batch that fails validation never
/// reaches the engine.
pub(crate) fn prepare_batch(
    records: Vec<LogRecord>,
    max_batch_size: usize,
) -> StorageResult<Vec<StoredLogRecord>> {
    if records.len() > max_batch_size {
        return Err(StorageError::BatchTooLarge {
            size: records.len(),
            max: max_batch_size,
        });
    }
    for record in &records {
        record.validate_record()?;
    }
    Ok(records.into_iter().map(StoredLogRecord::assign).collect())
}

/// Trims the `limit + 1` probe row and derives the next-page cursor.
pub(crate) fn paginate(
    mut rows: Vec<StoredLogRecord>,
    limit: u64,
) -> (Vec<StoredLogRecord>, Option<String>) {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let next_cursor = if rows.len() > limit {
        rows.truncate(limit);
        rows.last()
            .map(|row| Cursor::new(row.record.timestamp, row.id).encode())
    } else {
        None
    };
    (rows, next_cursor)
}
