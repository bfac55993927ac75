//! The `Reservoir` façade.
//!
//! A thin, stateful wrapper holding exactly one storage engine for its
//! lifetime. The composition root constructs it explicitly and hands out
//! references; there is no module-level singleton. Whether a failed
//! initialization is fatal to the process or retried is the composition
//! root's decision; the façade only guarantees that initialization is
//! serialized and idempotent on success.

use tokio::sync::Mutex;
use tracing::info;

use crate::config::{EngineType, StorageConfig};
use crate::engine::factory::{create_engine, EngineOptions};
use crate::engine::{
    EngineCapabilities, EngineState, HealthStatus, IngestResult, IngestReturningResult,
    StorageEngine, StorageSegment,
};
use crate::error::StorageResult;
use crate::models::{
    AggregateParams, AggregateResult, DeleteParams, DistinctParams, LogRecord, QueryParams,
    QueryResult, RecordFilter, TimeRange, TopValuesParams, ValueCount,
};

/// Engine-agnostic entry point for log storage.
///
/// # Example
///
/// ```no_run
/// use reservoir::{EngineOptions, EngineType, Reservoir, StorageConfig};
///
/// # async fn example() -> Result<(), reservoir::StorageError> {
/// let store = Reservoir::new(
///     EngineType::Relational,
///     StorageConfig::from_env(),
///     EngineOptions::none(),
/// )?;
/// store.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub struct Reservoir {
    engine: Box<dyn StorageEngine>,
    // Serializes initialize()/close(); true once initialization succeeded.
    initialized: Mutex<bool>,
}

impl Reservoir {
    /// Creates a façade over the engine selected by `engine_type`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings or an
    /// unimplemented engine type. Nothing connects until `initialize()`.
    pub fn new(
        engine_type: EngineType,
        config: StorageConfig,
        options: EngineOptions,
    ) -> StorageResult<Self> {
        Ok(Self::from_engine(create_engine(
            engine_type,
            config,
            options,
        )?))
    }

    /// Creates a façade over an already-constructed engine.
    #[must_use]
    pub fn from_engine(engine: Box<dyn StorageEngine>) -> Self {
        Self {
            engine,
            initialized: Mutex::new(false),
        }
    }

    /// Static capabilities of the held engine. Valid before
    /// `initialize()`.
    #[must_use]
    pub fn capabilities(&self) -> EngineCapabilities {
        self.engine.capabilities()
    }

    /// Lifecycle state of the held engine.
    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Connects and initializes the engine.
    ///
    /// Idempotent after success. Concurrent callers are serialized: the
    /// underlying engine sees exactly one `initialize()` per attempt, and
    /// callers arriving during a pending attempt await its outcome.
    ///
    /// # Errors
    ///
    /// Propagates connection and schema errors unmodified; the flag stays
    /// unset so a later call retries.
    pub async fn initialize(&self) -> StorageResult<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }
        self.engine.connect().await?;
        self.engine.initialize().await?;
        *initialized = true;
        info!("storage initialized");
        Ok(())
    }

    /// Releases the engine's owned resources.
    ///
    /// Safe to call in any state, including before initialization, and
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Propagates engine shutdown errors.
    pub async fn close(&self) -> StorageResult<()> {
        let mut initialized = self.initialized.lock().await;
        self.engine.disconnect().await?;
        *initialized = false;
        Ok(())
    }

    /// Applies schema migrations up to `version`.
    ///
    /// # Errors
    ///
    /// Propagates engine and migration errors.
    pub async fn migrate(&self, version: u32) -> StorageResult<()> {
        self.engine.migrate(version).await
    }

    /// Probes the underlying engine.
    ///
    /// # Errors
    ///
    /// Only fails on infrastructure errors; an unreachable engine reports
    /// an unhealthy status instead of an error.
    pub async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.engine.health_check().await
    }

    /// Stores a batch of records atomically.
    ///
    /// # Errors
    ///
    /// Fails with `NotInitialized` before `initialize()`, a validation
    /// error for a bad batch, or an engine error.
    pub async fn ingest(&self, records: Vec<LogRecord>) -> StorageResult<IngestResult> {
        self.engine.ingest(records).await
    }

    /// Stores a batch atomically, returning the stored records with their
    /// assigned ids in input order.
    ///
    /// # Errors
    ///
    /// Same error surface as [`Reservoir::ingest`].
    pub async fn ingest_returning(
        &self,
        records: Vec<LogRecord>,
    ) -> StorageResult<IngestReturningResult> {
        self.engine.ingest_returning(records).await
    }

    /// Runs a filtered, paginated query.
    ///
    /// # Errors
    ///
    /// Fails with `NotInitialized` before `initialize()`, a validation
    /// error for bad parameters, or an engine error.
    pub async fn query(&self, params: QueryParams) -> StorageResult<QueryResult> {
        self.engine.query(params).await
    }

    /// Runs a time-bucketed aggregation.
    ///
    /// # Errors
    ///
    /// Same error surface as [`Reservoir::query`].
    pub async fn aggregate(&self, params: AggregateParams) -> StorageResult<AggregateResult> {
        self.engine.aggregate(params).await
    }

    /// Counts records matching a filter.
    ///
    /// # Errors
    ///
    /// Same error surface as [`Reservoir::query`].
    pub async fn count(&self, filter: RecordFilter) -> StorageResult<u64> {
        self.engine.count(filter).await
    }

    /// Collects distinct values of an allow-listed field.
    ///
    /// # Errors
    ///
    /// Same error surface as [`Reservoir::query`].
    pub async fn distinct(&self, params: DistinctParams) -> StorageResult<Vec<String>> {
        self.engine.distinct(params).await
    }

    /// Ranks the most frequent values of an allow-listed field.
    ///
    /// # Errors
    ///
    /// Same error surface as [`Reservoir::query`].
    pub async fn top_values(&self, params: TopValuesParams) -> StorageResult<Vec<ValueCount>> {
        self.engine.top_values(params).await
    }

    /// Deletes records in a time range.
    ///
    /// On the columnar engine the deletion is applied asynchronously; see
    /// [`EngineCapabilities::synchronous_deletes`].
    ///
    /// # Errors
    ///
    /// Same error surface as [`Reservoir::query`].
    pub async fn delete_by_time_range(&self, params: DeleteParams) -> StorageResult<u64> {
        self.engine.delete_by_time_range(params).await
    }

    /// Reports the physical storage segments covering a time range.
    ///
    /// # Errors
    ///
    /// Same error surface as [`Reservoir::query`].
    pub async fn segments(&self, range: TimeRange) -> StorageResult<Vec<StorageSegment>> {
        self.engine.segments(range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::error::StorageError;
    use crate::models::{Severity, TimeRange};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn facade() -> Reservoir {
        Reservoir::from_engine(Box::new(MemoryEngine::new()))
    }

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_query_before_initialize_fails_fast() {
        let store = facade();
        let err = store
            .query(QueryParams::new(RecordFilter::new(range())))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }

    #[tokio::test]
    async fn test_capabilities_before_initialize() {
        let store = facade();
        assert!(store.capabilities().synchronous_deletes);
        assert_eq!(store.engine_state(), EngineState::Unconnected);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = facade();
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.engine_state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_settles_once() {
        let store = Arc::new(facade());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.initialize().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.engine_state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_close_before_initialize_is_safe_and_idempotent() {
        let store = facade();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert_eq!(store.engine_state(), EngineState::Closed);
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let store = facade();
        store.initialize().await.unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let accepted = store
            .ingest(vec![
                LogRecord::new("acme", "web", "api", Severity::Info, "hello").with_timestamp(t0)
            ])
            .await
            .unwrap();
        assert_eq!(accepted.accepted, 1);

        let result = store
            .query(QueryParams::new(RecordFilter::new(range())))
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);
        assert!(result.next_cursor.is_none());

        let health = store.health_check().await.unwrap();
        assert!(health.healthy);

        store.close().await.unwrap();
    }
}
