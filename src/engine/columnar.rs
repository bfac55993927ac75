//! Columnar storage engine for the ClickHouse family.
//!
//! Wraps a `clickhouse` HTTP client, stores records in a `MergeTree` table
//! partitioned by day, and executes the named-parameter statements
//! produced by [`ColumnarTranslator`]. Deletions are lightweight
//! mutations applied asynchronously by the server; this asymmetry with the
//! relational engine is surfaced through `EngineCapabilities`.

use async_trait::async_trait;
use chrono::DateTime;
use clickhouse::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    paginate, prepare_batch, EngineCapabilities, EngineState, HealthStatus, IngestResult,
    IngestReturningResult, StateCell, StorageEngine, StorageSegment,
};
use crate::config::{EngineType, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::models::{
    AggregateParams, AggregateResult, DeleteParams, DistinctParams, LogRecord, QueryParams,
    QueryResult, RecordFilter, Severity, StoredLogRecord, TimeBucket, TimeRange, TopValuesParams,
    ValueCount,
};
use crate::translate::columnar::{ColumnarTranslator, NamedStatement, ParamValue};
use crate::translate::QueryTranslator;

/// Latest schema migration version known to this engine.
pub const LATEST_MIGRATION: u32 = 2;

/// A log record in the engine's row layout.
///
/// Optional fields use empty-string sentinels; metadata travels as a JSON
/// string read back through `JSONExtractString`.
#[derive(Debug, clickhouse::Row, Serialize, Deserialize)]
struct ColumnarLogRow {
    #[serde(with = "clickhouse::serde::uuid")]
    id: Uuid,
    timestamp: i64,
    org_id: String,
    project_id: String,
    service: String,
    level: String,
    message: String,
    metadata: String,
    trace_id: String,
    span_id: String,
}

impl ColumnarLogRow {
    fn from_stored(stored: &StoredLogRecord) -> Self {
        let record = &stored.record;
        Self {
            id: stored.id,
            timestamp: record.timestamp.timestamp_nanos_opt().unwrap_or(0),
            org_id: record.org_id.clone(),
            project_id: record.project_id.clone(),
            service: record.service.clone(),
            level: record.level.to_string(),
            message: record.message.clone(),
            metadata: if record.metadata.is_empty() {
                String::new()
            } else {
                serde_json::to_string(&record.metadata).unwrap_or_default()
            },
            trace_id: record.trace_id.clone().unwrap_or_default(),
            span_id: record.span_id.clone().unwrap_or_default(),
        }
    }

    fn into_stored(self) -> StoredLogRecord {
        let metadata: HashMap<String, serde_json::Value> = if self.metadata.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&self.metadata).unwrap_or_default()
        };

        StoredLogRecord {
            id: self.id,
            record: LogRecord {
                timestamp: DateTime::from_timestamp_nanos(self.timestamp),
                org_id: self.org_id,
                project_id: self.project_id,
                service: self.service,
                level: Severity::parse_lossy(&self.level),
                message: self.message,
                metadata,
                trace_id: if self.trace_id.is_empty() {
                    None
                } else {
                    Some(self.trace_id)
                },
                span_id: if self.span_id.is_empty() {
                    None
                } else {
                    Some(self.span_id)
                },
            },
        }
    }
}

#[derive(Debug, clickhouse::Row, Deserialize)]
struct BucketRow {
    bucket: i64,
    level: String,
    total: u64,
}

#[derive(Debug, clickhouse::Row, Deserialize)]
struct ValueRow {
    value: String,
}

#[derive(Debug, clickhouse::Row, Deserialize)]
struct ValueCountRow {
    value: String,
    total: u64,
}

#[derive(Debug, clickhouse::Row, Deserialize)]
struct PartRow {
    name: String,
    rows: u64,
    bytes: u64,
    min_ts: i64,
    max_ts: i64,
}

/// Storage engine backed by a ClickHouse-family analytical database.
pub struct ColumnarEngine {
    config: StorageConfig,
    translator: ColumnarTranslator,
    client: RwLock<Option<Client>>,
    injected: bool,
    state: StateCell,
}

impl ColumnarEngine {
    /// Creates an engine that will build its own client from config.
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        let translator = ColumnarTranslator::new(config.table.clone());
        Self {
            config,
            translator,
            client: RwLock::new(None),
            injected: false,
            state: StateCell::new(),
        }
    }

    /// Creates an engine around an externally-owned client.
    ///
    /// Scalar connection settings in `config` are ignored; the client's
    /// lifecycle belongs to the injecting caller.
    #[must_use]
    pub fn with_client(config: StorageConfig, client: Client) -> Self {
        let translator = ColumnarTranslator::new(config.table.clone());
        Self {
            config,
            translator,
            client: RwLock::new(Some(client)),
            injected: true,
            state: StateCell::new(),
        }
    }

    fn build_client(&self) -> Client {
        Client::default()
            .with_url(format!("http://{}:{}", self.config.host, self.config.port))
            .with_database(&self.config.database)
            .with_user(&self.config.username)
            .with_password(&self.config.password)
    }

    async fn client(&self) -> StorageResult<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    /// Statements for one migration version.
    fn migration_statements(&self, version: u32) -> StorageResult<Vec<String>> {
        let table = &self.config.table;
        match version {
            1 => Ok(vec![format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id UUID, \
                 timestamp DateTime64(9), \
                 org_id String, \
                 project_id String, \
                 service String, \
                 level LowCardinality(String), \
                 message String, \
                 metadata String, \
                 trace_id String, \
                 span_id String) \
                 ENGINE = MergeTree \
                 PARTITION BY toDate(timestamp) \
                 ORDER BY (org_id, timestamp, id)"
            )]),
            2 => Ok(vec![format!(
                "ALTER TABLE {table} ADD INDEX IF NOT EXISTS message_tokens_idx \
                 lowerUTF8(message) TYPE tokenbf_v1(32768, 3, 0) GRANULARITY 4"
            )]),
            other => Err(StorageError::UnknownMigration(other)),
        }
    }

    async fn apply_migrations(&self, client: &Client, target: u32) -> StorageResult<()> {
        if target == 0 || target > LATEST_MIGRATION {
            return Err(StorageError::UnknownMigration(target));
        }
        let table = &self.config.table;

        client
            .query(&format!(
                "CREATE TABLE IF NOT EXISTS {table}_migrations (\
                 version UInt32, applied_at DateTime DEFAULT now()) \
                 ENGINE = MergeTree ORDER BY version"
            ))
            .execute()
            .await?;

        let current: u32 = client
            .query(&format!("SELECT max(version) FROM {table}_migrations"))
            .fetch_one::<u32>()
            .await?;

        for version in (current + 1)..=target {
            for statement in self.migration_statements(version)? {
                client.query(&statement).execute().await?;
            }
            client
                .query(&format!(
                    "INSERT INTO {table}_migrations (version) VALUES ({version})"
                ))
                .execute()
                .await?;
            info!(version, table = %table, "applied columnar schema migration");
        }
        Ok(())
    }

    /// Applies a translated statement's named parameters to a query.
    fn bind_statement(client: &Client, statement: &NamedStatement) -> clickhouse::query::Query {
        let mut query = client.query(&statement.sql);
        for (name, value) in &statement.params {
            query = match value {
                ParamValue::Text(v) => query.param(name, v.clone()),
                ParamValue::TextArray(v) => query.param(name, v.clone()),
                ParamValue::Int64(v) => query.param(name, *v),
            };
        }
        query
    }
}

#[async_trait]
impl StorageEngine for ColumnarEngine {
    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities::for_engine(EngineType::Columnar)
    }

    fn state(&self) -> EngineState {
        self.state.load()
    }

    async fn connect(&self) -> StorageResult<()> {
        match self.state.load() {
            EngineState::Closed => return Err(StorageError::Closed),
            EngineState::Connected | EngineState::Ready => return Ok(()),
            EngineState::Unconnected => {}
        }

        let mut guard = self.client.write().await;
        if guard.is_none() {
            *guard = Some(self.build_client());
        }
        let client = guard.clone().ok_or(StorageError::NotInitialized)?;
        drop(guard);

        client.query("SELECT 1").fetch_one::<u8>().await?;
        debug!(host = %self.config.host, "connected columnar client");
        self.state.store(EngineState::Connected);
        Ok(())
    }

    async fn initialize(&self) -> StorageResult<()> {
        match self.state.load() {
            EngineState::Closed => return Err(StorageError::Closed),
            EngineState::Ready => return Ok(()),
            EngineState::Unconnected => self.connect().await?,
            EngineState::Connected => {}
        }

        if self.config.skip_schema_init {
            debug!("schema declared externally managed; skipping setup");
        } else {
            let client = self.client().await?;
            self.apply_migrations(&client, LATEST_MIGRATION).await?;
        }

        self.state.store(EngineState::Ready);
        Ok(())
    }

    async fn migrate(&self, version: u32) -> StorageResult<()> {
        if self.state.load() == EngineState::Closed {
            return Err(StorageError::Closed);
        }
        let client = self.client().await?;
        self.apply_migrations(&client, version).await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        if self.state.load() == EngineState::Closed {
            return Ok(());
        }
        // The HTTP client holds no exclusive resources; dropping the
        // handle is enough for both owned and injected clients.
        let mut guard = self.client.write().await;
        if !self.injected {
            guard.take();
        }
        drop(guard);
        self.state.store(EngineState::Closed);
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let Some(client) = self.client.read().await.clone() else {
            return Ok(HealthStatus::unhealthy("not connected"));
        };
        match client.query("SELECT 1").fetch_one::<u8>().await {
            Ok(_) => Ok(HealthStatus::healthy()),
            Err(err) => Ok(HealthStatus::unhealthy(err.to_string())),
        }
    }

    async fn ingest(&self, records: Vec<LogRecord>) -> StorageResult<IngestResult> {
        self.state.ensure_ready()?;
        let stored = prepare_batch(records, self.capabilities().max_batch_size)?;
        if stored.is_empty() {
            return Ok(IngestResult { accepted: 0 });
        }

        // One insert block: the server applies it atomically.
        let client = self.client().await?;
        let mut insert = client.insert::<ColumnarLogRow>(&self.config.table).await?;
        for row in &stored {
            insert.write(&ColumnarLogRow::from_stored(row)).await?;
        }
        insert.end().await?;

        Ok(IngestResult {
            accepted: stored.len(),
        })
    }

    async fn ingest_returning(
        &self,
        records: Vec<LogRecord>,
    ) -> StorageResult<IngestReturningResult> {
        self.state.ensure_ready()?;
        let stored = prepare_batch(records, self.capabilities().max_batch_size)?;
        if !stored.is_empty() {
            let client = self.client().await?;
            let mut insert = client.insert::<ColumnarLogRow>(&self.config.table).await?;
            for row in &stored {
                insert.write(&ColumnarLogRow::from_stored(row)).await?;
            }
            insert.end().await?;
        }
        Ok(IngestReturningResult { records: stored })
    }

    async fn query(&self, params: QueryParams) -> StorageResult<QueryResult> {
        self.state.ensure_ready()?;
        let statement = self.translator.translate_query(&params)?;
        let client = self.client().await?;
        debug!(params = statement.params.len(), "executing columnar query");
        let rows = Self::bind_statement(&client, &statement)
            .fetch_all::<ColumnarLogRow>()
            .await?;

        let records: Vec<StoredLogRecord> =
            rows.into_iter().map(ColumnarLogRow::into_stored).collect();
        let (records, next_cursor) = paginate(records, params.limit);
        Ok(QueryResult {
            records,
            next_cursor,
        })
    }

    async fn aggregate(&self, params: AggregateParams) -> StorageResult<AggregateResult> {
        self.state.ensure_ready()?;
        let statement = self.translator.translate_aggregate(&params)?;
        let client = self.client().await?;
        let rows = Self::bind_statement(&client, &statement)
            .fetch_all::<BucketRow>()
            .await?;

        let mut timeseries: Vec<TimeBucket> = Vec::new();
        for row in rows {
            let bucket_start = DateTime::from_timestamp_nanos(row.bucket);
            match timeseries.last_mut() {
                Some(bucket) if bucket.bucket_start == bucket_start => {
                    bucket
                        .counts
                        .insert(Severity::parse_lossy(&row.level), row.total);
                }
                _ => {
                    let mut counts = HashMap::new();
                    counts.insert(Severity::parse_lossy(&row.level), row.total);
                    timeseries.push(TimeBucket {
                        bucket_start,
                        counts,
                    });
                }
            }
        }
        Ok(AggregateResult { timeseries })
    }

    async fn count(&self, filter: RecordFilter) -> StorageResult<u64> {
        self.state.ensure_ready()?;
        let statement = self.translator.translate_count(&filter)?;
        let client = self.client().await?;
        Ok(Self::bind_statement(&client, &statement)
            .fetch_one::<u64>()
            .await?)
    }

    async fn distinct(&self, params: DistinctParams) -> StorageResult<Vec<String>> {
        self.state.ensure_ready()?;
        let statement = self.translator.translate_distinct(&params)?;
        let client = self.client().await?;
        let rows = Self::bind_statement(&client, &statement)
            .fetch_all::<ValueRow>()
            .await?;
        Ok(rows.into_iter().map(|row| row.value).collect())
    }

    async fn top_values(&self, params: TopValuesParams) -> StorageResult<Vec<ValueCount>> {
        self.state.ensure_ready()?;
        let statement = self.translator.translate_top_values(&params)?;
        let client = self.client().await?;
        let rows = Self::bind_statement(&client, &statement)
            .fetch_all::<ValueCountRow>()
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ValueCount {
                value: row.value,
                count: row.total,
            })
            .collect())
    }

    async fn delete_by_time_range(&self, params: DeleteParams) -> StorageResult<u64> {
        self.state.ensure_ready()?;

        // The mutation reports no row count, so matching rows are counted
        // first. The returned number is the count of rows scheduled for
        // deletion; the mutation itself is applied asynchronously.
        let filter = RecordFilter {
            range: params.range,
            org_ids: params.org_ids.clone(),
            project_ids: None,
            services: None,
            levels: None,
            search: None,
        };
        let count_statement = self.translator.translate_count(&filter)?;
        let client = self.client().await?;
        let scheduled = Self::bind_statement(&client, &count_statement)
            .fetch_one::<u64>()
            .await?;

        let statement = self.translator.translate_delete(&params)?;
        Self::bind_statement(&client, &statement).execute().await?;
        debug!(scheduled, "issued delete mutation");
        Ok(scheduled)
    }

    async fn segments(&self, range: TimeRange) -> StorageResult<Vec<StorageSegment>> {
        self.state.ensure_ready()?;
        let client = self.client().await?;

        let rows = client
            .query(
                "SELECT name, rows, bytes_on_disk AS bytes, \
                 toUnixTimestamp64Nano(toDateTime64(min_time, 9)) AS min_ts, \
                 toUnixTimestamp64Nano(toDateTime64(max_time, 9)) AS max_ts \
                 FROM system.parts \
                 WHERE database = currentDatabase() AND table = {table:String} \
                 AND active \
                 AND min_time <= toDateTime(intDiv({to_ts:Int64}, 1000000000)) \
                 AND max_time >= toDateTime(intDiv({from_ts:Int64}, 1000000000)) \
                 ORDER BY min_time",
            )
            .param("table", self.config.table.clone())
            .param("to_ts", range.to.timestamp_nanos_opt().unwrap_or(0))
            .param("from_ts", range.from.timestamp_nanos_opt().unwrap_or(0))
            .fetch_all::<PartRow>()
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| StorageSegment {
                name: row.name,
                starts_at: DateTime::from_timestamp_nanos(row.min_ts),
                ends_at: DateTime::from_timestamp_nanos(row.max_ts),
                rows: Some(row.rows),
                bytes: Some(row.bytes),
            })
            .collect())
    }
}
