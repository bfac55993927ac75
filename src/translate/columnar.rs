//! Query translation for the columnar analytical engine.
//!
//! Produces SQL with server-side named parameters (`{name:Type}`), so
//! value types are explicit at the wire level. Structured metadata is read
//! through `JSONExtractString`; substring search uses the locale-aware
//! `positionCaseInsensitiveUTF8`; token search uses `hasToken` over the
//! lower-cased message. Deletion is a lightweight mutation
//! (`ALTER TABLE ... DELETE`), applied asynchronously by the engine.

use super::{
    cursor_position, scalar_filters, validate_array_filter, validate_field_name,
    validate_pagination, FieldRef, FilterValue, QueryTranslator,
};
use crate::error::StorageResult;
use crate::models::{
    AggregateParams, BucketInterval, DeleteParams, DistinctParams, QueryParams, RecordFilter,
    SearchMode, SortOrder, TopValuesParams,
};

/// A named parameter value for the columnar engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// String value.
    Text(String),
    /// Array of strings.
    TextArray(Vec<String>),
    /// 64-bit signed integer (timestamps travel as epoch nanoseconds).
    Int64(i64),
}

/// A SQL statement with named, typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedStatement {
    /// The SQL text with `{name:Type}` placeholders.
    pub sql: String,
    /// Named parameter values.
    pub params: Vec<(String, ParamValue)>,
}

#[derive(Debug, Default)]
struct ParamList {
    params: Vec<(String, ParamValue)>,
}

impl ParamList {
    fn push(&mut self, name: impl Into<String>, value: ParamValue) {
        self.params.push((name.into(), value));
    }
}

const SELECT_COLUMNS: &str =
    "id, timestamp, org_id, project_id, service, level, message, metadata, trace_id, span_id";

/// Translator for the columnar engine.
#[derive(Debug, Clone)]
pub struct ColumnarTranslator {
    table: String,
}

impl ColumnarTranslator {
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
        params: &mut ParamList,
    ) -> StorageResult<Vec<String>> {
        let mut conditions = Vec::new();

        let from_op = if filter.range.include_from { ">=" } else { ">" };
        let to_op = if filter.range.include_to { "<=" } else { "<" };
        params.push(
            "from_ts",
            ParamValue::Int64(filter.range.from.timestamp_nanos_opt().unwrap_or(0)),
        );
        conditions.push(format!(
            "timestamp {from_op} fromUnixTimestamp64Nano({{from_ts:Int64}})"
        ));
        params.push(
            "to_ts",
            ParamValue::Int64(filter.range.to.timestamp_nanos_opt().unwrap_or(0)),
        );
        conditions.push(format!(
            "timestamp {to_op} fromUnixTimestamp64Nano({{to_ts:Int64}})"
        ));

        for scalar in scalar_filters(filter)? {
            match scalar.value {
                FilterValue::Text(value) => {
                    conditions.push(format!(
                        "{col} = {{{col}:String}}",
                        col = scalar.column
                    ));
                    params.push(scalar.column, ParamValue::Text(value));
                }
                FilterValue::TextList(values) => {
                    conditions.push(format!(
                        "{col} IN {{{col}_list:Array(String)}}",
                        col = scalar.column
                    ));
                    params.push(
                        format!("{}_list", scalar.column),
                        ParamValue::TextArray(values),
                    );
                }
            }
        }

        if let Some(search) = &filter.search {
            match search.mode {
                SearchMode::FullText => {
                    // hasToken only accepts single tokens, so the term is
                    // split and every token must match.
                    let term = search.term.to_lowercase();
                    for (i, token) in term
                        .split(|c: char| !c.is_alphanumeric())
                        .filter(|t| !t.is_empty())
                        .enumerate()
                    {
                        let name = format!("search_{i}");
                        conditions.push(format!(
                            "hasToken(lowerUTF8(message), {{{name}:String}})"
                        ));
                        params.push(name, ParamValue::Text(token.to_string()));
                    }
                }
                SearchMode::Substring => {
                    conditions.push(
                        "positionCaseInsensitiveUTF8(message, {search:String}) > 0".to_string(),
                    );
                    params.push("search", ParamValue::Text(search.term.clone()));
                }
            }
        }

        Ok(conditions)
    }
}

impl QueryTranslator for ColumnarTranslator {
    type Statement = NamedStatement;

    fn translate_query(&self, params: &QueryParams) -> StorageResult<NamedStatement> {
        validate_pagination(params.limit)?;

        let mut named = ParamList::default();
        let mut conditions = self.filter_conditions(&params.filter, &mut named)?;

        let cursor = cursor_position(params);
        if let Some(cursor) = cursor {
            let cmp = match params.order {
                SortOrder::Descending => "<",
                SortOrder::Ascending => ">",
            };
            conditions.push(format!(
                "(timestamp, id) {cmp} (fromUnixTimestamp64Nano({{cursor_ts:Int64}}), \
                 toUUID({{cursor_id:String}}))"
            ));
            named.push(
                "cursor_ts",
                ParamValue::Int64(cursor.timestamp.timestamp_nanos_opt().unwrap_or(0)),
            );
            named.push("cursor_id", ParamValue::Text(cursor.id.to_string()));
        }

        let direction = match params.order {
            SortOrder::Descending => "DESC",
            SortOrder::Ascending => "ASC",
        };

        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {table} WHERE {conditions} \
             ORDER BY timestamp {direction}, id {direction} LIMIT {fetch}",
            table = self.table,
            conditions = conditions.join(" AND "),
            fetch = params.limit + 1,
        );

        if cursor.is_none() {
            if let Some(offset) = params.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        Ok(NamedStatement {
            sql,
            params: named.params,
        })
    }

    fn translate_count(&self, filter: &RecordFilter) -> StorageResult<NamedStatement> {
        let mut named = ParamList::default();
        let conditions = self.filter_conditions(filter, &mut named)?;

        Ok(NamedStatement {
            sql: format!(
                "SELECT count() FROM {table} WHERE {conditions}",
                table = self.table,
                conditions = conditions.join(" AND "),
            ),
            params: named.params,
        })
    }

    fn translate_aggregate(&self, params: &AggregateParams) -> StorageResult<NamedStatement> {
        let mut named = ParamList::default();
        let conditions = self.filter_conditions(&params.filter, &mut named)?;

        Ok(NamedStatement {
            sql: format!(
                "SELECT toUnixTimestamp64Nano(toDateTime64(toStartOfInterval(timestamp, \
                 {interval}), 9)) AS bucket, level, count() AS total FROM {table} \
                 WHERE {conditions} GROUP BY bucket, level ORDER BY bucket ASC",
                interval = ch_interval(params.interval),
                table = self.table,
                conditions = conditions.join(" AND "),
            ),
            params: named.params,
        })
    }

    fn translate_distinct(&self, params: &DistinctParams) -> StorageResult<NamedStatement> {
        let field = validate_field_name(&params.field)?;
        if let Some(limit) = params.limit {
            validate_pagination(limit)?;
        }

        let mut named = ParamList::default();
        let expr = field_expression(&field, &mut named);
        let conditions = self.filter_conditions(&params.filter, &mut named)?;

        let mut sql = format!(
            "SELECT DISTINCT {expr} AS value FROM {table} WHERE {conditions} \
             AND {expr} != '' ORDER BY value ASC",
            table = self.table,
            conditions = conditions.join(" AND "),
        );
        if let Some(limit) = params.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        Ok(NamedStatement {
            sql,
            params: named.params,
        })
    }

    fn translate_top_values(&self, params: &TopValuesParams) -> StorageResult<NamedStatement> {
        let field = validate_field_name(&params.field)?;
        validate_pagination(params.limit)?;

        let mut named = ParamList::default();
        let expr = field_expression(&field, &mut named);
        let conditions = self.filter_conditions(&params.filter, &mut named)?;

        Ok(NamedStatement {
            sql: format!(
                "SELECT {expr} AS value, count() AS total FROM {table} WHERE {conditions} \
                 AND {expr} != '' GROUP BY value ORDER BY total DESC, value ASC LIMIT {limit}",
                table = self.table,
                conditions = conditions.join(" AND "),
                limit = params.limit,
            ),
            params: named.params,
        })
    }

    fn translate_delete(&self, params: &DeleteParams) -> StorageResult<NamedStatement> {
        let mut named = ParamList::default();
        let mut conditions = Vec::new();

        let from_op = if params.range.include_from { ">=" } else { ">" };
        let to_op = if params.range.include_to { "<=" } else { "<" };
        named.push(
            "from_ts",
            ParamValue::Int64(params.range.from.timestamp_nanos_opt().unwrap_or(0)),
        );
        conditions.push(format!(
            "timestamp {from_op} fromUnixTimestamp64Nano({{from_ts:Int64}})"
        ));
        named.push(
            "to_ts",
            ParamValue::Int64(params.range.to.timestamp_nanos_opt().unwrap_or(0)),
        );
        conditions.push(format!(
            "timestamp {to_op} fromUnixTimestamp64Nano({{to_ts:Int64}})"
        ));

        if let Some(org_ids) = &params.org_ids {
            validate_array_filter("org_id", org_ids)?;
            if org_ids.len() == 1 {
                conditions.push("org_id = {org_id:String}".to_string());
                named.push("org_id", ParamValue::Text(org_ids[0].clone()));
            } else {
                conditions.push("org_id IN {org_id_list:Array(String)}".to_string());
                named.push("org_id_list", ParamValue::TextArray(org_ids.clone()));
            }
        }

        // Lightweight mutation: the engine applies it asynchronously, which
        // is surfaced to callers through EngineCapabilities.
        Ok(NamedStatement {
            sql: format!(
                "ALTER TABLE {table} DELETE WHERE {conditions}",
                table = self.table,
                conditions = conditions.join(" AND "),
            ),
            params: named.params,
        })
    }
}

/// Renders a validated field reference as a SQL expression.
fn field_expression(field: &FieldRef, params: &mut ParamList) -> String {
    match field {
        FieldRef::Column(column) => (*column).to_string(),
        FieldRef::Metadata(key) => {
            params.push("mkey", ParamValue::Text(key.clone()));
            "JSONExtractString(metadata, {mkey:String})".to_string()
        }
    }
}

/// Interval clause understood by `toStartOfInterval`.
const fn ch_interval(interval: BucketInterval) -> &'static str {
    match interval {
        BucketInterval::OneMinute => "INTERVAL 1 MINUTE",
        BucketInterval::FiveMinutes => "INTERVAL 5 MINUTE",
        BucketInterval::FifteenMinutes => "INTERVAL 15 MINUTE",
        BucketInterval::ThirtyMinutes => "INTERVAL 30 MINUTE",
        BucketInterval::OneHour => "INTERVAL 1 HOUR",
        BucketInterval::SixHours => "INTERVAL 6 HOUR",
        BucketInterval::TwelveHours => "INTERVAL 12 HOUR",
        BucketInterval::OneDay => "INTERVAL 1 DAY",
        BucketInterval::OneWeek => "INTERVAL 1 WEEK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Cursor;
    use crate::error::StorageError;
    use crate::models::{Severity, TimeRange};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    fn translator() -> ColumnarTranslator {
        ColumnarTranslator::new("log_records")
    }

    fn param<'a>(stmt: &'a NamedStatement, name: &str) -> &'a ParamValue {
        &stmt
            .params
            .iter()
            .find(|(n, _)| n == name)
            .unwrap_or_else(|| panic!("missing param {name}"))
            .1
    }

    #[test]
    fn test_query_basic_shape() {
        let params = QueryParams::new(RecordFilter::new(range())).with_limit(50);
        let stmt = translator().translate_query(&params).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT id, timestamp, org_id, project_id, service, level, message, metadata, \
             trace_id, span_id FROM log_records \
             WHERE timestamp >= fromUnixTimestamp64Nano({from_ts:Int64}) \
             AND timestamp < fromUnixTimestamp64Nano({to_ts:Int64}) \
             ORDER BY timestamp DESC, id DESC LIMIT 51"
        );
        assert_eq!(
            *param(&stmt, "from_ts"),
            ParamValue::Int64(range().from.timestamp_nanos_opt().unwrap())
        );
    }

    #[test]
    fn test_query_membership_uses_array_parameter() {
        let filter = RecordFilter::new(range())
            .with_services(vec!["api".to_string(), "worker".to_string()])
            .with_level(Severity::Error);
        let stmt = translator()
            .translate_query(&QueryParams::new(filter))
            .unwrap();

        assert!(stmt.sql.contains("service IN {service_list:Array(String)}"));
        assert!(stmt.sql.contains("level = {level:String}"));
        assert_eq!(
            *param(&stmt, "service_list"),
            ParamValue::TextArray(vec!["api".to_string(), "worker".to_string()])
        );
        assert_eq!(*param(&stmt, "level"), ParamValue::Text("error".to_string()));
    }

    #[test]
    fn test_query_substring_search() {
        let filter = RecordFilter::new(range()).with_search("Timeout", SearchMode::Substring);
        let stmt = translator()
            .translate_query(&QueryParams::new(filter))
            .unwrap();

        assert!(stmt
            .sql
            .contains("positionCaseInsensitiveUTF8(message, {search:String}) > 0"));
        assert_eq!(*param(&stmt, "search"), ParamValue::Text("Timeout".to_string()));
    }

    #[test]
    fn test_query_fulltext_search_tokenizes_and_lowers() {
        let filter =
            RecordFilter::new(range()).with_search("Connection REFUSED", SearchMode::FullText);
        let stmt = translator()
            .translate_query(&QueryParams::new(filter))
            .unwrap();

        assert!(stmt
            .sql
            .contains("hasToken(lowerUTF8(message), {search_0:String})"));
        assert!(stmt
            .sql
            .contains("hasToken(lowerUTF8(message), {search_1:String})"));
        assert_eq!(
            *param(&stmt, "search_0"),
            ParamValue::Text("connection".to_string())
        );
        assert_eq!(
            *param(&stmt, "search_1"),
            ParamValue::Text("refused".to_string())
        );
    }

    #[test]
    fn test_query_keyset_cursor_tuple_comparison() {
        let cursor = Cursor::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            Uuid::new_v4(),
        );
        let params = QueryParams::new(RecordFilter::new(range())).with_cursor(cursor.encode());
        let stmt = translator().translate_query(&params).unwrap();

        assert!(stmt.sql.contains(
            "(timestamp, id) < (fromUnixTimestamp64Nano({cursor_ts:Int64}), \
             toUUID({cursor_id:String}))"
        ));
        assert_eq!(
            *param(&stmt, "cursor_id"),
            ParamValue::Text(cursor.id.to_string())
        );
    }

    #[test]
    fn test_query_malformed_cursor_is_ignored() {
        let params = QueryParams::new(RecordFilter::new(range())).with_cursor("@@@@");
        let stmt = translator().translate_query(&params).unwrap();

        assert!(!stmt.sql.contains("cursor_ts"));
    }

    #[test]
    fn test_query_rejects_empty_array() {
        let filter = RecordFilter::new(range()).with_levels(Vec::new());
        assert!(matches!(
            translator()
                .translate_query(&QueryParams::new(filter))
                .unwrap_err(),
            StorageError::EmptyArrayFilter("level")
        ));
    }

    #[test]
    fn test_query_rejects_oversized_limit() {
        let params =
            QueryParams::new(RecordFilter::new(range())).with_limit(crate::translate::MAX_QUERY_LIMIT + 1);
        assert!(matches!(
            translator().translate_query(&params).unwrap_err(),
            StorageError::InvalidLimit(_)
        ));
    }

    #[test]
    fn test_aggregate_shape() {
        let params = AggregateParams::new(RecordFilter::new(range()), BucketInterval::OneHour);
        let stmt = translator().translate_aggregate(&params).unwrap();

        assert!(stmt.sql.contains("toStartOfInterval(timestamp, INTERVAL 1 HOUR)"));
        assert!(stmt.sql.contains("GROUP BY bucket, level ORDER BY bucket ASC"));
    }

    #[test]
    fn test_distinct_on_metadata_uses_json_extraction() {
        let params = DistinctParams::new(RecordFilter::new(range()), "metadata.region");
        let stmt = translator().translate_distinct(&params).unwrap();

        assert!(stmt
            .sql
            .contains("JSONExtractString(metadata, {mkey:String})"));
        assert_eq!(*param(&stmt, "mkey"), ParamValue::Text("region".to_string()));
    }

    #[test]
    fn test_distinct_rejects_unsafe_field() {
        let params = DistinctParams::new(RecordFilter::new(range()), "level; DROP TABLE x");
        assert!(matches!(
            translator().translate_distinct(&params).unwrap_err(),
            StorageError::InvalidFieldName(_)
        ));
    }

    #[test]
    fn test_top_values_shape() {
        let params = TopValuesParams::new(RecordFilter::new(range()), "service").with_limit(5);
        let stmt = translator().translate_top_values(&params).unwrap();

        assert!(stmt.sql.contains("GROUP BY value ORDER BY total DESC, value ASC LIMIT 5"));
    }

    #[test]
    fn test_delete_is_a_mutation() {
        let params = DeleteParams::new(range()).with_orgs(vec!["acme".to_string()]);
        let stmt = translator().translate_delete(&params).unwrap();

        assert!(stmt.sql.starts_with("ALTER TABLE log_records DELETE WHERE"));
        assert!(stmt.sql.contains("org_id = {org_id:String}"));
    }

    #[test]
    fn test_query_and_count_share_filter_semantics() {
        let filter = RecordFilter::new(range()).with_org("acme");
        let query = translator()
            .translate_query(&QueryParams::new(filter.clone()))
            .unwrap();
        let count = translator().translate_count(&filter).unwrap();

        assert!(query.sql.contains("org_id = {org_id:String}"));
        assert!(count.sql.contains("org_id = {org_id:String}"));
        assert_eq!(*param(&query, "org_id"), *param(&count, "org_id"));
    }
}
