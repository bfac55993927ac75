//! Query, aggregation, and deletion parameter types.
//!
//! These are the engine-agnostic parameters accepted by every storage
//! engine. Translators turn them into engine-native SQL; the structures
//! themselves never carry anything engine-specific.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::log::{Severity, StoredLogRecord};

/// Default page size applied when the caller does not set one.
pub const DEFAULT_QUERY_LIMIT: u64 = 100;

/// A mandatory time range with independently controlled boundary
/// inclusivity.
///
/// The default is the half-open interval `[from, to)`, which is what
/// chained range scans over append-only data want.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Lower bound of the range.
    pub from: DateTime<Utc>,
    /// Upper bound of the range.
    pub to: DateTime<Utc>,
    /// Whether `from` itself is part of the range.
    pub include_from: bool,
    /// Whether `to` itself is part of the range.
    pub include_to: bool,
}

impl TimeRange {
    /// Creates the half-open range `[from, to)`.
    #[must_use]
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            include_from: true,
            include_to: false,
        }
    }

    /// Excludes the lower bound, producing `(from, to)`.
    #[must_use]
    pub fn with_exclusive_from(mut self) -> Self {
        self.include_from = false;
        self
    }

    /// Includes the upper bound, producing `[from, to]`.
    #[must_use]
    pub fn with_inclusive_to(mut self) -> Self {
        self.include_to = true;
        self
    }

    /// Tests whether a timestamp falls inside the range.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let lower_ok = if self.include_from {
            ts >= self.from
        } else {
            ts > self.from
        };
        let upper_ok = if self.include_to {
            ts <= self.to
        } else {
            ts < self.to
        };
        lower_ok && upper_ok
    }
}

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest records first.
    Ascending,
    /// Newest records first.
    Descending,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Descending
    }
}

/// How a search term is matched against the log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Case-insensitive substring match on the raw message.
    Substring,
    /// Token/word match against the engine's full-text index.
    FullText,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self::Substring
    }
}

/// A message search term with an explicit matching mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// The search term.
    pub term: String,
    /// The matching mode.
    pub mode: SearchMode,
}

/// The common record filters shared by query, count, aggregate, distinct,
/// and top-values operations.
///
/// Each scalar-or-array filter is represented as an optional vector: a
/// single-element vector is the scalar form. Empty vectors are invalid and
/// rejected by the translators before any SQL is built.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    /// Mandatory time range.
    pub range: TimeRange,
    /// Filter by organization id(s).
    pub org_ids: Option<Vec<String>>,
    /// Filter by project id(s).
    pub project_ids: Option<Vec<String>>,
    /// Filter by service name(s).
    pub services: Option<Vec<String>>,
    /// Filter by severity level(s).
    pub levels: Option<Vec<Severity>>,
    /// Optional message search.
    pub search: Option<SearchQuery>,
}

impl RecordFilter {
    /// Creates a filter covering the given time range, with no other
    /// predicates.
    #[must_use]
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            org_ids: None,
            project_ids: None,
            services: None,
            levels: None,
            search: None,
        }
    }

    /// Filters by a single organization.
    #[must_use]
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_ids = Some(vec![org_id.into()]);
        self
    }

    /// Filters by a set of organizations.
    #[must_use]
    pub fn with_orgs(mut self, org_ids: Vec<String>) -> Self {
        self.org_ids = Some(org_ids);
        self
    }

    /// Filters by a single project.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_ids = Some(vec![project_id.into()]);
        self
    }

    /// Filters by a set of projects.
    #[must_use]
    pub fn with_projects(mut self, project_ids: Vec<String>) -> Self {
        self.project_ids = Some(project_ids);
        self
    }

    /// Filters by a single service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services = Some(vec![service.into()]);
        self
    }

    /// Filters by a set of services.
    #[must_use]
    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services = Some(services);
        self
    }

    /// Filters by a single severity level.
    #[must_use]
    pub fn with_level(mut self, level: Severity) -> Self {
        self.levels = Some(vec![level]);
        self
    }

    /// Filters by a set of severity levels.
    #[must_use]
    pub fn with_levels(mut self, levels: Vec<Severity>) -> Self {
        self.levels = Some(levels);
        self
    }

    /// Adds a message search predicate.
    #[must_use]
    pub fn with_search(mut self, term: impl Into<String>, mode: SearchMode) -> Self {
        self.search = Some(SearchQuery {
            term: term.into(),
            mode,
        });
        self
    }
}

/// Parameters for a paginated log query.
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Record filters.
    pub filter: RecordFilter,
    /// Sort order over `(timestamp, id)`.
    pub order: SortOrder,
    /// Maximum number of records to return.
    pub limit: u64,
    /// Opaque keyset cursor from a previous page.
    ///
    /// A malformed cursor is treated as absent, never as an error.
    pub cursor: Option<String>,
    /// Row offset, used only as a fallback when no cursor is supplied.
    pub offset: Option<u64>,
}

impl QueryParams {
    /// Creates query parameters with the default limit and descending
    /// order.
    #[must_use]
    pub fn new(filter: RecordFilter) -> Self {
        Self {
            filter,
            order: SortOrder::default(),
            limit: DEFAULT_QUERY_LIMIT,
            cursor: None,
            offset: None,
        }
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Continues from an opaque cursor returned by a previous page.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Sets the offset fallback for cursor-less pagination.
    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Result of a paginated log query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// The records of this page, in the requested order.
    pub records: Vec<StoredLogRecord>,
    /// Cursor for the next page; present iff more rows exist beyond
    /// `limit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Bucketing interval for time-series aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketInterval {
    /// One-minute buckets.
    OneMinute,
    /// Five-minute buckets.
    FiveMinutes,
    /// Fifteen-minute buckets.
    FifteenMinutes,
    /// Thirty-minute buckets.
    ThirtyMinutes,
    /// One-hour buckets.
    OneHour,
    /// Six-hour buckets.
    SixHours,
    /// Twelve-hour buckets.
    TwelveHours,
    /// One-day buckets, aligned to UTC midnight.
    OneDay,
    /// One-week buckets, aligned to Monday.
    OneWeek,
}

impl BucketInterval {
    /// Bucket width in seconds.
    #[must_use]
    pub const fn as_seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::ThirtyMinutes => 1800,
            Self::OneHour => 3600,
            Self::SixHours => 21_600,
            Self::TwelveHours => 43_200,
            Self::OneDay => 86_400,
            Self::OneWeek => 604_800,
        }
    }
}

/// Parameters for a time-bucketed aggregation.
#[derive(Debug, Clone)]
pub struct AggregateParams {
    /// Record filters.
    pub filter: RecordFilter,
    /// Bucket width.
    pub interval: BucketInterval,
}

impl AggregateParams {
    /// Creates aggregation parameters.
    #[must_use]
    pub fn new(filter: RecordFilter, interval: BucketInterval) -> Self {
        Self { filter, interval }
    }
}

/// One aggregation bucket: per-severity record counts for the interval
/// starting at `bucket_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Start of the bucket interval.
    pub bucket_start: DateTime<Utc>,
    /// Record counts keyed by severity; severities with zero records are
    /// absent.
    pub counts: HashMap<Severity, u64>,
}

impl TimeBucket {
    /// Count for a single severity, zero when absent.
    #[must_use]
    pub fn count_for(&self, level: Severity) -> u64 {
        self.counts.get(&level).copied().unwrap_or(0)
    }

    /// Total count across all severities.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Result of a time-bucketed aggregation.
///
/// Buckets are ordered ascending by `bucket_start`. Buckets with zero
/// matching rows are omitted by the engine; callers that need a dense
/// series must fill the gaps with zero themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    /// The non-empty buckets, ascending by start time.
    pub timeseries: Vec<TimeBucket>,
}

/// Parameters for a distinct-values query over one field.
#[derive(Debug, Clone)]
pub struct DistinctParams {
    /// Record filters.
    pub filter: RecordFilter,
    /// The field to collect values of: an allow-listed column or a
    /// `metadata.<key>` reference.
    pub field: String,
    /// Optional cap on the number of values returned.
    pub limit: Option<u64>,
}

impl DistinctParams {
    /// Creates distinct-query parameters.
    #[must_use]
    pub fn new(filter: RecordFilter, field: impl Into<String>) -> Self {
        Self {
            filter,
            field: field.into(),
            limit: None,
        }
    }

    /// Caps the number of values returned.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Parameters for a most-frequent-values query over one field.
#[derive(Debug, Clone)]
pub struct TopValuesParams {
    /// Record filters.
    pub filter: RecordFilter,
    /// The field to rank values of: an allow-listed column or a
    /// `metadata.<key>` reference.
    pub field: String,
    /// Number of values to return.
    pub limit: u64,
}

impl TopValuesParams {
    /// Creates top-values parameters with the default limit of 10.
    #[must_use]
    pub fn new(filter: RecordFilter, field: impl Into<String>) -> Self {
        Self {
            filter,
            field: field.into(),
            limit: 10,
        }
    }

    /// Sets the number of values to return.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }
}

/// One value with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    /// The field value.
    pub value: String,
    /// Number of records carrying the value.
    pub count: u64,
}

/// Parameters for retention deletion by time range.
#[derive(Debug, Clone)]
pub struct DeleteParams {
    /// The time range to delete.
    pub range: TimeRange,
    /// Optional organization scoping; absent means all organizations.
    pub org_ids: Option<Vec<String>>,
}

impl DeleteParams {
    /// Creates deletion parameters for a time range across all
    /// organizations.
    #[must_use]
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            org_ids: None,
        }
    }

    /// Scopes the deletion to a set of organizations.
    #[must_use]
    pub fn with_orgs(mut self, org_ids: Vec<String>) -> Self {
        self.org_ids = Some(org_ids);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_time_range_default_is_half_open() {
        let r = range();
        assert!(r.contains(r.from));
        assert!(!r.contains(r.to));
    }

    #[test]
    fn test_time_range_exclusive_from() {
        let r = range().with_exclusive_from();
        assert!(!r.contains(r.from));
        assert!(r.contains(r.from + chrono::Duration::nanoseconds(1)));
    }

    #[test]
    fn test_time_range_inclusive_to() {
        let r = range().with_inclusive_to();
        assert!(r.contains(r.to));
    }

    #[test]
    fn test_query_params_defaults() {
        let params = QueryParams::new(RecordFilter::new(range()));
        assert_eq!(params.limit, DEFAULT_QUERY_LIMIT);
        assert_eq!(params.order, SortOrder::Descending);
        assert!(params.cursor.is_none());
        assert!(params.offset.is_none());
    }

    #[test]
    fn test_filter_builder_scalar_becomes_single_element() {
        let filter = RecordFilter::new(range())
            .with_org("acme")
            .with_service("api")
            .with_level(Severity::Error);

        assert_eq!(filter.org_ids, Some(vec!["acme".to_string()]));
        assert_eq!(filter.services, Some(vec!["api".to_string()]));
        assert_eq!(filter.levels, Some(vec![Severity::Error]));
    }

    #[test]
    fn test_bucket_interval_seconds() {
        assert_eq!(BucketInterval::OneMinute.as_seconds(), 60);
        assert_eq!(BucketInterval::OneHour.as_seconds(), 3600);
        assert_eq!(BucketInterval::OneDay.as_seconds(), 86_400);
        assert_eq!(BucketInterval::OneWeek.as_seconds(), 604_800);
    }

    #[test]
    fn test_time_bucket_counts() {
        let mut counts = HashMap::new();
        counts.insert(Severity::Error, 3);
        counts.insert(Severity::Info, 7);
        let bucket = TimeBucket {
            bucket_start: range().from,
            counts,
        };

        assert_eq!(bucket.count_for(Severity::Error), 3);
        assert_eq!(bucket.count_for(Severity::Debug), 0);
        assert_eq!(bucket.total(), 10);
    }

    #[test]
    fn test_top_values_default_limit() {
        let params = TopValuesParams::new(RecordFilter::new(range()), "service");
        assert_eq!(params.limit, 10);
    }
}
