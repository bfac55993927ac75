//! Data models shared by every storage engine.
//!
//! The `log` module defines the record types; the `query` module defines
//! the engine-agnostic parameter and result types that translators turn
//! into native SQL.

pub mod log;
pub mod query;

pub use log::{LogRecord, RecordValidationError, Severity, StoredLogRecord};
pub use query::{
    AggregateParams, AggregateResult, BucketInterval, DeleteParams, DistinctParams, QueryParams,
    QueryResult, RecordFilter, SearchMode, SearchQuery, SortOrder, TimeBucket, TimeRange,
    TopValuesParams, ValueCount, DEFAULT_QUERY_LIMIT,
};
