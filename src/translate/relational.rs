//! Query translation for the relational time-series engine.
//!
//! Produces parameterized SQL for a Postgres/TimescaleDB-family store:
//! positional `$n` placeholders, `= ANY($n)` membership predicates, keyset
//! pagination as a `(time, id)` row comparison, and `time_bucket` based
//! aggregation. Caller data only ever appears in the bind list.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    cursor_position, escape_like, scalar_filters, validate_array_filter, validate_field_name,
    validate_pagination, FieldRef, FilterValue, QueryTranslator,
};
use crate::error::StorageResult;
use crate::models::{
    AggregateParams, BucketInterval, DeleteParams, DistinctParams, QueryParams, RecordFilter,
    SearchMode, SortOrder, TopValuesParams,
};

/// A positional bind value for the relational engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Text value.
    Text(String),
    /// Text array, bound as a single array parameter.
    TextArray(Vec<String>),
    /// Timestamp with timezone.
    Timestamp(DateTime<Utc>),
    /// 64-bit integer.
    BigInt(i64),
    /// UUID value.
    Uuid(Uuid),
}

/// A parameterized SQL statement with positional binds.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// The SQL text with `$n` placeholders.
    pub sql: String,
    /// Bind values, in placeholder order.
    pub binds: Vec<SqlValue>,
}

/// Accumulates bind values and hands out their placeholder numbers.
#[derive(Debug, Default)]
struct BindList {
    binds: Vec<SqlValue>,
}

impl BindList {
    /// Adds a bind value and returns its 1-based placeholder number.
    fn push(&mut self, value: SqlValue) -> usize {
        self.binds.push(value);
        self.binds.len()
    }
}

const SELECT_COLUMNS: &str =
    "id, time, org_id, project_id, service, level, message, metadata, trace_id, span_id";

/// Translator for the relational engine.
#[derive(Debug, Clone)]
pub struct RelationalTranslator {
    table: String,
}

impl RelationalTranslator {
    /// Creates a translator targeting the given (already validated) table.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Builds the shared WHERE conditions for a record filter.
    fn filter_conditions(
        &self,
        filter: &RecordFilter,
        binds: &mut BindList,
    ) -> StorageResult<Vec<String>> {
        let mut conditions = Vec::new();

        let from_op = if filter.range.include_from { ">=" } else { ">" };
        let to_op = if filter.range.include_to { "<=" } else { "<" };
        let from_n = binds.push(SqlValue::Timestamp(filter.range.from));
        conditions.push(format!("time {from_op} ${from_n}"));
        let to_n = binds.push(SqlValue::Timestamp(filter.range.to));
        conditions.push(format!("time {to_op} ${to_n}"));

        for scalar in scalar_filters(filter)? {
            match scalar.value {
                FilterValue::Text(value) => {
                    let n = binds.push(SqlValue::Text(value));
                    conditions.push(format!("{} = ${n}", scalar.column));
                }
                FilterValue::TextList(values) => {
                    let n = binds.push(SqlValue::TextArray(values));
                    conditions.push(format!("{} = ANY(${n})", scalar.column));
                }
            }
        }

        if let Some(search) = &filter.search {
            match search.mode {
                SearchMode::FullText => {
                    let n = binds.push(SqlValue::Text(search.term.to_lowercase()));
                    conditions.push(format!("search_vector @@ plainto_tsquery('simple', ${n})"));
                }
                SearchMode::Substring => {
                    let n = binds.push(SqlValue::Text(format!("%{}%", escape_like(&search.term))));
                    conditions.push(format!("message ILIKE ${n} ESCAPE '\\'"));
                }
            }
        }

        Ok(conditions)
    }
}

impl QueryTranslator for RelationalTranslator {
    type Statement = SqlStatement;

    fn translate_query(&self, params: &QueryParams) -> StorageResult<SqlStatement> {
        validate_pagination(params.limit)?;

        let mut binds = BindList::default();
        let mut conditions = self.filter_conditions(&params.filter, &mut binds)?;

        let cursor = cursor_position(params);
        if let Some(cursor) = cursor {
            let cmp = match params.order {
                SortOrder::Descending => "<",
                SortOrder::Ascending => ">",
            };
            let ts_n = binds.push(SqlValue::Timestamp(cursor.timestamp));
            let id_n = binds.push(SqlValue::Uuid(cursor.id));
            conditions.push(format!(
                "(time, id) {cmp} (${ts_n}::timestamptz, ${id_n}::uuid)"
            ));
        }

        let direction = match params.order {
            SortOrder::Descending => "DESC",
            SortOrder::Ascending => "ASC",
        };

        // One extra row tells the engine whether a further page exists
        // without a second count query.
        let fetch = i64::try_from(params.limit + 1).unwrap_or(i64::MAX);
        let limit_n = binds.push(SqlValue::BigInt(fetch));

        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {table} WHERE {conditions} \
             ORDER BY time {direction}, id {direction} LIMIT ${limit_n}",
            table = self.table,
            conditions = conditions.join(" AND "),
        );

        // Offset paging is only the cursor-less fallback; keyset and offset
        // never combine.
        if cursor.is_none() {
            if let Some(offset) = params.offset {
                let offset_n = binds.push(SqlValue::BigInt(
                    i64::try_from(offset).unwrap_or(i64::MAX),
                ));
                sql.push_str(&format!(" OFFSET ${offset_n}"));
            }
        }

        Ok(SqlStatement {
            sql,
            binds: binds.binds,
        })
    }

    fn translate_count(&self, filter: &RecordFilter) -> StorageResult<SqlStatement> {
        let mut binds = BindList::default();
        let conditions = self.filter_conditions(filter, &mut binds)?;

        Ok(SqlStatement {
            sql: format!(
                "SELECT COUNT(*) FROM {table} WHERE {conditions}",
                table = self.table,
                conditions = conditions.join(" AND "),
            ),
            binds: binds.binds,
        })
    }

    fn translate_aggregate(&self, params: &AggregateParams) -> StorageResult<SqlStatement> {
        let mut binds = BindList::default();
        let interval_n = binds.push(SqlValue::Text(pg_interval(params.interval).to_string()));
        let conditions = self.filter_conditions(&params.filter, &mut binds)?;

        Ok(SqlStatement {
            sql: format!(
                "SELECT time_bucket(${interval_n}::interval, time) AS bucket, level, \
                 COUNT(*) AS total FROM {table} WHERE {conditions} \
                 GROUP BY 1, 2 ORDER BY 1 ASC",
                table = self.table,
                conditions = conditions.join(" AND "),
            ),
            binds: binds.binds,
        })
    }

    fn translate_distinct(&self, params: &DistinctParams) -> StorageResult<SqlStatement> {
        let field = validate_field_name(&params.field)?;
        if let Some(limit) = params.limit {
            validate_pagination(limit)?;
        }

        let mut binds = BindList::default();
        let expr = field_expression(&field, &mut binds);
        let conditions = self.filter_conditions(&params.filter, &mut binds)?;

        let mut sql = format!(
            "SELECT DISTINCT {expr} AS value FROM {table} WHERE {conditions} \
             AND {expr} IS NOT NULL ORDER BY 1 ASC",
            table = self.table,
            conditions = conditions.join(" AND "),
        );
        if let Some(limit) = params.limit {
            let limit_n = binds.push(SqlValue::BigInt(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ${limit_n}"));
        }

        Ok(SqlStatement {
            sql,
            binds: binds.binds,
        })
    }

    fn translate_top_values(&self, params: &TopValuesParams) -> StorageResult<SqlStatement> {
        let field = validate_field_name(&params.field)?;
        validate_pagination(params.limit)?;

        let mut binds = BindList::default();
        let expr = field_expression(&field, &mut binds);
        let conditions = self.filter_conditions(&params.filter, &mut binds)?;
        let limit_n = binds.push(SqlValue::BigInt(
            i64::try_from(params.limit).unwrap_or(i64::MAX),
        ));

        Ok(SqlStatement {
            sql: format!(
                "SELECT {expr} AS value, COUNT(*) AS total FROM {table} WHERE {conditions} \
                 AND {expr} IS NOT NULL GROUP BY 1 ORDER BY 2 DESC, 1 ASC LIMIT ${limit_n}",
                table = self.table,
                conditions = conditions.join(" AND "),
            ),
            binds: binds.binds,
        })
    }

    fn translate_delete(&self, params: &DeleteParams) -> StorageResult<SqlStatement> {
        let mut binds = BindList::default();
        let mut conditions = Vec::new();

        let from_op = if params.range.include_from { ">=" } else { ">" };
        let to_op = if params.range.include_to { "<=" } else { "<" };
        let from_n = binds.push(SqlValue::Timestamp(params.range.from));
        conditions.push(format!("time {from_op} ${from_n}"));
        let to_n = binds.push(SqlValue::Timestamp(params.range.to));
        conditions.push(format!("time {to_op} ${to_n}"));

        if let Some(org_ids) = &params.org_ids {
            validate_array_filter("org_id", org_ids)?;
            if org_ids.len() == 1 {
                let n = binds.push(SqlValue::Text(org_ids[0].clone()));
                conditions.push(format!("org_id = ${n}"));
            } else {
                let n = binds.push(SqlValue::TextArray(org_ids.clone()));
                conditions.push(format!("org_id = ANY(${n})"));
            }
        }

        Ok(SqlStatement {
            sql: format!(
                "DELETE FROM {table} WHERE {conditions}",
                table = self.table,
                conditions = conditions.join(" AND "),
            ),
            binds: binds.binds,
        })
    }
}

/// Renders a validated field reference as a SQL expression.
///
/// Columns come from the allow-list, so interpolation is safe; metadata
/// keys still travel as binds via the `->>` operator.
fn field_expression(field: &FieldRef, binds: &mut BindList) -> String {
    match field {
        FieldRef::Column(column) => (*column).to_string(),
        FieldRef::Metadata(key) => {
            let n = binds.push(SqlValue::Text(key.clone()));
            format!("metadata->>${n}")
        }
    }
}

/// Interval literal understood by `time_bucket`.
const fn pg_interval(interval: BucketInterval) -> &'static str {
    match interval {
        BucketInterval::OneMinute => "1 minute",
        BucketInterval::FiveMinutes => "5 minutes",
        BucketInterval::FifteenMinutes => "15 minutes",
        BucketInterval::ThirtyMinutes => "30 minutes",
        BucketInterval::OneHour => "1 hour",
        BucketInterval::SixHours => "6 hours",
        BucketInterval::TwelveHours => "12 hours",
        BucketInterval::OneDay => "1 day",
        BucketInterval::OneWeek => "1 week",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Cursor;
    use crate::error::StorageError;
    use crate::models::Severity;
    use crate::models::TimeRange;
    use chrono::TimeZone;

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    fn translator() -> RelationalTranslator {
        RelationalTranslator::new("log_records")
    }

    #[test]
    fn test_query_basic_shape() {
        let params = QueryParams::new(RecordFilter::new(range())).with_limit(50);
        let stmt = translator().translate_query(&params).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT id, time, org_id, project_id, service, level, message, metadata, \
             trace_id, span_id FROM log_records WHERE time >= $1 AND time < $2 \
             ORDER BY time DESC, id DESC LIMIT $3"
        );
        assert_eq!(stmt.binds.len(), 3);
        // One row beyond the page size.
        assert_eq!(stmt.binds[2], SqlValue::BigInt(51));
    }

    #[test]
    fn test_query_respects_range_inclusivity() {
        let r = range().with_exclusive_from().with_inclusive_to();
        let params = QueryParams::new(RecordFilter::new(r));
        let stmt = translator().translate_query(&params).unwrap();

        assert!(stmt.sql.contains("time > $1"));
        assert!(stmt.sql.contains("time <= $2"));
    }

    #[test]
    fn test_query_scalar_and_array_filters() {
        let filter = RecordFilter::new(range())
            .with_org("acme")
            .with_services(vec!["api".to_string(), "worker".to_string()])
            .with_levels(vec![Severity::Error, Severity::Critical]);
        let stmt = translator()
            .translate_query(&QueryParams::new(filter))
            .unwrap();

        assert!(stmt.sql.contains("org_id = $3"));
        assert!(stmt.sql.contains("service = ANY($4)"));
        assert!(stmt.sql.contains("level = ANY($5)"));
        assert_eq!(
            stmt.binds[4],
            SqlValue::TextArray(vec!["error".to_string(), "critical".to_string()])
        );
    }

    #[test]
    fn test_query_fulltext_search_lowers_term() {
        let filter = RecordFilter::new(range()).with_search("Connection REFUSED", SearchMode::FullText);
        let stmt = translator()
            .translate_query(&QueryParams::new(filter))
            .unwrap();

        assert!(stmt
            .sql
            .contains("search_vector @@ plainto_tsquery('simple', $3)"));
        assert_eq!(
            stmt.binds[2],
            SqlValue::Text("connection refused".to_string())
        );
    }

    #[test]
    fn test_query_substring_search_escapes_pattern() {
        let filter = RecordFilter::new(range()).with_search("100%_done", SearchMode::Substring);
        let stmt = translator()
            .translate_query(&QueryParams::new(filter))
            .unwrap();

        assert!(stmt.sql.contains("message ILIKE $3 ESCAPE '\\'"));
        assert_eq!(stmt.binds[2], SqlValue::Text("%100\\%\\_done%".to_string()));
    }

    #[test]
    fn test_query_keyset_cursor_descending() {
        let cursor = Cursor::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            Uuid::new_v4(),
        );
        let params = QueryParams::new(RecordFilter::new(range())).with_cursor(cursor.encode());
        let stmt = translator().translate_query(&params).unwrap();

        assert!(stmt
            .sql
            .contains("(time, id) < ($3::timestamptz, $4::uuid)"));
        assert_eq!(stmt.binds[2], SqlValue::Timestamp(cursor.timestamp));
        assert_eq!(stmt.binds[3], SqlValue::Uuid(cursor.id));
    }

    #[test]
    fn test_query_keyset_cursor_ascending_flips_comparison() {
        let cursor = Cursor::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            Uuid::new_v4(),
        );
        let params = QueryParams::new(RecordFilter::new(range()))
            .with_order(SortOrder::Ascending)
            .with_cursor(cursor.encode());
        let stmt = translator().translate_query(&params).unwrap();

        assert!(stmt
            .sql
            .contains("(time, id) > ($3::timestamptz, $4::uuid)"));
        assert!(stmt.sql.contains("ORDER BY time ASC, id ASC"));
    }

    #[test]
    fn test_query_malformed_cursor_falls_open_to_offset() {
        let params = QueryParams::new(RecordFilter::new(range()))
            .with_cursor("!!! definitely not a cursor !!!")
            .with_offset(40);
        let stmt = translator().translate_query(&params).unwrap();

        assert!(!stmt.sql.contains("(time, id)"));
        assert!(stmt.sql.ends_with("OFFSET $4"));
    }

    #[test]
    fn test_query_cursor_suppresses_offset() {
        let cursor = Cursor::new(range().from, Uuid::new_v4());
        let params = QueryParams::new(RecordFilter::new(range()))
            .with_cursor(cursor.encode())
            .with_offset(40);
        let stmt = translator().translate_query(&params).unwrap();

        assert!(!stmt.sql.contains("OFFSET"));
    }

    #[test]
    fn test_query_rejects_zero_limit() {
        let params = QueryParams::new(RecordFilter::new(range())).with_limit(0);
        assert!(matches!(
            translator().translate_query(&params).unwrap_err(),
            StorageError::InvalidLimit(0)
        ));
    }

    #[test]
    fn test_query_rejects_empty_array_before_building_sql() {
        let filter = RecordFilter::new(range()).with_orgs(Vec::new());
        assert!(matches!(
            translator()
                .translate_query(&QueryParams::new(filter))
                .unwrap_err(),
            StorageError::EmptyArrayFilter("org_id")
        ));
    }

    #[test]
    fn test_count_shape() {
        let stmt = translator()
            .translate_count(&RecordFilter::new(range()).with_org("acme"))
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM log_records WHERE time >= $1 AND time < $2 AND org_id = $3"
        );
    }

    #[test]
    fn test_aggregate_buckets_by_interval_and_level() {
        let params = AggregateParams::new(RecordFilter::new(range()), BucketInterval::OneHour);
        let stmt = translator().translate_aggregate(&params).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT time_bucket($1::interval, time) AS bucket, level, COUNT(*) AS total \
             FROM log_records WHERE time >= $2 AND time < $3 GROUP BY 1, 2 ORDER BY 1 ASC"
        );
        assert_eq!(stmt.binds[0], SqlValue::Text("1 hour".to_string()));
    }

    #[test]
    fn test_distinct_on_column() {
        let params = DistinctParams::new(RecordFilter::new(range()), "service").with_limit(100);
        let stmt = translator().translate_distinct(&params).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT DISTINCT service AS value FROM log_records WHERE time >= $1 AND time < $2 \
             AND service IS NOT NULL ORDER BY 1 ASC LIMIT $3"
        );
    }

    #[test]
    fn test_distinct_on_metadata_key_binds_key() {
        let params = DistinctParams::new(RecordFilter::new(range()), "metadata.region");
        let stmt = translator().translate_distinct(&params).unwrap();

        assert!(stmt.sql.contains("metadata->>$1"));
        assert_eq!(stmt.binds[0], SqlValue::Text("region".to_string()));
    }

    #[test]
    fn test_distinct_rejects_unsafe_field() {
        let params = DistinctParams::new(RecordFilter::new(range()), "service; DROP TABLE x");
        assert!(matches!(
            translator().translate_distinct(&params).unwrap_err(),
            StorageError::InvalidFieldName(_)
        ));
    }

    #[test]
    fn test_top_values_shape() {
        let params = TopValuesParams::new(RecordFilter::new(range()), "service").with_limit(5);
        let stmt = translator().translate_top_values(&params).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT service AS value, COUNT(*) AS total FROM log_records \
             WHERE time >= $1 AND time < $2 AND service IS NOT NULL \
             GROUP BY 1 ORDER BY 2 DESC, 1 ASC LIMIT $3"
        );
        assert_eq!(stmt.binds[2], SqlValue::BigInt(5));
    }

    #[test]
    fn test_delete_by_range_with_org_scope() {
        let params = DeleteParams::new(range()).with_orgs(vec!["acme".to_string()]);
        let stmt = translator().translate_delete(&params).unwrap();

        assert_eq!(
            stmt.sql,
            "DELETE FROM log_records WHERE time >= $1 AND time < $2 AND org_id = $3"
        );
    }

    #[test]
    fn test_delete_rejects_empty_org_array() {
        let params = DeleteParams::new(range()).with_orgs(Vec::new());
        assert!(matches!(
            translator().translate_delete(&params).unwrap_err(),
            StorageError::EmptyArrayFilter("org_id")
        ));
    }
}
