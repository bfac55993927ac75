//! In-memory storage engine.
//!
//! Implements the full `StorageEngine` contract over a `Vec` behind an
//! `RwLock`. Suitable for development, tests, and single-node deployments
//! with limited data volumes; data is not persisted across restarts.
//!
//! The engine reproduces the same observable semantics as the database
//! engines (shared validation, keyset pagination over `(timestamp, id)`,
//! bucket alignment) so the contract's properties can be exercised
//! without a running database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{
    paginate, prepare_batch, EngineCapabilities, EngineState, HealthStatus, IngestResult,
    IngestReturningResult, StateCell, StorageEngine, StorageSegment,
};
use crate::cursor::Cursor;
use crate::error::{StorageError, StorageResult};
use crate::models::{
    AggregateParams, AggregateResult, BucketInterval, DeleteParams, DistinctParams, LogRecord,
    QueryParams, QueryResult, RecordFilter, SearchMode, SortOrder, StoredLogRecord, TimeBucket,
    TimeRange, TopValuesParams, ValueCount,
};
use crate::translate::{scalar_filters, validate_field_name, validate_pagination, FieldRef};

/// Capabilities of the in-memory engine.
const MEMORY_CAPABILITIES: EngineCapabilities = EngineCapabilities {
    full_text_search: true,
    transactional_batches: true,
    synchronous_deletes: true,
    max_batch_size: 10_000,
};

/// In-memory storage engine for development and testing.
#[derive(Debug)]
pub struct MemoryEngine {
    rows: Arc<RwLock<Vec<StoredLogRecord>>>,
    state: StateCell,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates a new empty in-memory engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(Vec::new())),
            state: StateCell::new(),
        }
    }

    fn read_rows(&self) -> StorageResult<Vec<StoredLogRecord>> {
        Ok(self.rows.read().map_err(|_| StorageError::Lock)?.clone())
    }

    /// Collects rows matching a filter, after running the shared
    /// validators so the engine rejects input exactly like the database
    /// engines.
    fn matching(&self, filter: &RecordFilter) -> StorageResult<Vec<StoredLogRecord>> {
        scalar_filters(filter)?;
        Ok(self
            .read_rows()?
            .into_iter()
            .filter(|row| row_matches(filter, row))
            .collect())
    }
}

fn row_matches(filter: &RecordFilter, row: &StoredLogRecord) -> bool {
    let record = &row.record;
    if !filter.range.contains(record.timestamp) {
        return false;
    }
    if let Some(org_ids) = &filter.org_ids {
        if !org_ids.contains(&record.org_id) {
            return false;
        }
    }
    if let Some(project_ids) = &filter.project_ids {
        if !project_ids.contains(&record.project_id) {
            return false;
        }
    }
    if let Some(services) = &filter.services {
        if !services.contains(&record.service) {
            return false;
        }
    }
    if let Some(levels) = &filter.levels {
        if !levels.contains(&record.level) {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let message = record.message.to_lowercase();
        let term = search.term.to_lowercase();
        match search.mode {
            SearchMode::Substring => {
                if !message.contains(&term) {
                    return false;
                }
            }
            SearchMode::FullText => {
                let tokens: Vec<&str> = message
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                    .collect();
                for wanted in term
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    if !tokens.contains(&wanted) {
                        return false;
                    }
                }
            }
        }
    }
    true
}

/// Extracts the value of a validated field from a row.
fn field_value(field: &FieldRef, row: &StoredLogRecord) -> Option<String> {
    let record = &row.record;
    match field {
        FieldRef::Column(column) => match *column {
            "org_id" => Some(record.org_id.clone()),
            "project_id" => Some(record.project_id.clone()),
            "service" => Some(record.service.clone()),
            "level" => Some(record.level.to_string()),
            "trace_id" => record.trace_id.clone(),
            "span_id" => record.span_id.clone(),
            _ => None,
        },
        FieldRef::Metadata(key) => match record.metadata.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        },
    }
}

/// Aligns a timestamp to the start of its bucket.
///
/// Buckets up to one day divide the UTC epoch evenly, so day buckets land
/// on midnight; week buckets are shifted to align on Monday.
fn bucket_start(ts: DateTime<Utc>, interval: BucketInterval) -> DateTime<Utc> {
    // 1970-01-05 was the first Monday after the epoch.
    const MONDAY_OFFSET_SECS: i64 = 4 * 86_400;

    let width = interval.as_seconds();
    let offset = if interval == BucketInterval::OneWeek {
        MONDAY_OFFSET_SECS
    } else {
        0
    };
    let secs = ts.timestamp();
    let aligned = secs - (secs - offset).rem_euclid(width);
    DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn capabilities(&self) -> EngineCapabilities {
        MEMORY_CAPABILITIES
    }

    fn state(&self) -> EngineState {
        self.state.load()
    }

    async fn connect(&self) -> StorageResult<()> {
        match self.state.load() {
            EngineState::Closed => Err(StorageError::Closed),
            EngineState::Unconnected => {
                self.state.store(EngineState::Connected);
                Ok(())
            }
            EngineState::Connected | EngineState::Ready => Ok(()),
        }
    }

    async fn initialize(&self) -> StorageResult<()> {
        match self.state.load() {
            EngineState::Closed => Err(StorageError::Closed),
            EngineState::Ready => Ok(()),
            EngineState::Unconnected | EngineState::Connected => {
                self.state.store(EngineState::Ready);
                Ok(())
            }
        }
    }

    async fn migrate(&self, version: u32) -> StorageResult<()> {
        // No schema to evolve; only the version gate is enforced.
        if version == 0 {
            return Err(StorageError::UnknownMigration(version));
        }
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.state.store(EngineState::Closed);
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus::healthy())
    }

    async fn ingest(&self, records: Vec<LogRecord>) -> StorageResult<IngestResult> {
        self.state.ensure_ready()?;
        let stored = prepare_batch(records, MEMORY_CAPABILITIES.max_batch_size)?;
        let accepted = stored.len();
        let mut rows = self.rows.write().map_err(|_| StorageError::Lock)?;
        rows.extend(stored);
        Ok(IngestResult { accepted })
    }

    async fn ingest_returning(
        &self,
        records: Vec<LogRecord>,
    ) -> StorageResult<IngestReturningResult> {
        self.state.ensure_ready()?;
        let stored = prepare_batch(records, MEMORY_CAPABILITIES.max_batch_size)?;
        let mut rows = self.rows.write().map_err(|_| StorageError::Lock)?;
        rows.extend(stored.iter().cloned());
        Ok(IngestReturningResult { records: stored })
    }

    async fn query(&self, params: QueryParams) -> StorageResult<QueryResult> {
        self.state.ensure_ready()?;
        validate_pagination(params.limit)?;

        let mut rows = self.matching(&params.filter)?;
        match params.order {
            SortOrder::Descending => {
                rows.sort_by(|a, b| (b.record.timestamp, b.id).cmp(&(a.record.timestamp, a.id)));
            }
            SortOrder::Ascending => {
                rows.sort_by(|a, b| (a.record.timestamp, a.id).cmp(&(b.record.timestamp, b.id)));
            }
        }

        let cursor = params.cursor.as_deref().and_then(Cursor::decode);
        if let Some(cursor) = cursor {
            let position = (cursor.timestamp, cursor.id);
            rows.retain(|row| {
                let key = (row.record.timestamp, row.id);
                match params.order {
                    SortOrder::Descending => key < position,
                    SortOrder::Ascending => key > position,
                }
            });
        } else if let Some(offset) = params.offset {
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            rows = rows.into_iter().skip(offset).collect();
        }

        let probe = usize::try_from(params.limit).unwrap_or(usize::MAX).saturating_add(1);
        rows.truncate(probe);
        let (records, next_cursor) = paginate(rows, params.limit);
        Ok(QueryResult {
            records,
            next_cursor,
        })
    }

    async fn aggregate(&self, params: AggregateParams) -> StorageResult<AggregateResult> {
        self.state.ensure_ready()?;
        let rows = self.matching(&params.filter)?;

        let mut buckets: HashMap<DateTime<Utc>, HashMap<crate::models::Severity, u64>> =
            HashMap::new();
        for row in &rows {
            let start = bucket_start(row.record.timestamp, params.interval);
            *buckets
                .entry(start)
                .or_default()
                .entry(row.record.level)
                .or_insert(0) += 1;
        }

        let mut timeseries: Vec<TimeBucket> = buckets
            .into_iter()
            .map(|(bucket_start, counts)| TimeBucket {
                bucket_start,
                counts,
            })
            .collect();
        timeseries.sort_by_key(|bucket| bucket.bucket_start);
        Ok(AggregateResult { timeseries })
    }

    async fn count(&self, filter: RecordFilter) -> StorageResult<u64> {
        self.state.ensure_ready()?;
        Ok(self.matching(&filter)?.len() as u64)
    }

    async fn distinct(&self, params: DistinctParams) -> StorageResult<Vec<String>> {
        self.state.ensure_ready()?;
        let field = validate_field_name(&params.field)?;
        if let Some(limit) = params.limit {
            validate_pagination(limit)?;
        }

        let rows = self.matching(&params.filter)?;
        let mut values: Vec<String> = rows
            .iter()
            .filter_map(|row| field_value(&field, row))
            .collect();
        values.sort();
        values.dedup();
        if let Some(limit) = params.limit {
            values.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(values)
    }

    async fn top_values(&self, params: TopValuesParams) -> StorageResult<Vec<ValueCount>> {
        self.state.ensure_ready()?;
        let field = validate_field_name(&params.field)?;
        validate_pagination(params.limit)?;

        let rows = self.matching(&params.filter)?;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for row in &rows {
            if let Some(value) = field_value(&field, row) {
                *counts.entry(value).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<ValueCount> = counts
            .into_iter()
            .map(|(value, count)| ValueCount { value, count })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        ranked.truncate(usize::try_from(params.limit).unwrap_or(usize::MAX));
        Ok(ranked)
    }

    async fn delete_by_time_range(&self, params: DeleteParams) -> StorageResult<u64> {
        self.state.ensure_ready()?;
        if let Some(org_ids) = &params.org_ids {
            crate::translate::validate_array_filter("org_id", org_ids)?;
        }

        let mut rows = self.rows.write().map_err(|_| StorageError::Lock)?;
        let before = rows.len();
        rows.retain(|row| {
            let in_range = params.range.contains(row.record.timestamp);
            let in_orgs = params
                .org_ids
                .as_ref()
                .is_none_or(|orgs| orgs.contains(&row.record.org_id));
            !(in_range && in_orgs)
        });
        Ok((before - rows.len()) as u64)
    }

    async fn segments(&self, range: TimeRange) -> StorageResult<Vec<StorageSegment>> {
        self.state.ensure_ready()?;
        let rows = self.read_rows()?;
        let covered: Vec<&StoredLogRecord> = rows
            .iter()
            .filter(|row| range.contains(row.record.timestamp))
            .collect();

        let (Some(min), Some(max)) = (
            covered.iter().map(|row| row.record.timestamp).min(),
            covered.iter().map(|row| row.record.timestamp).max(),
        ) else {
            return Ok(Vec::new());
        };

        Ok(vec![StorageSegment {
            name: "memory-0".to_string(),
            starts_at: min,
            ends_at: max,
            rows: Some(covered.len() as u64),
            bytes: None,
        }])
    }
}
