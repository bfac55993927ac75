//! Query translation: the engine-agnostic contract plus shared validation.
//!
//! Each engine ships a translator that turns abstract parameters into a
//! native statement: SQL text plus bound parameters, never a string with
//! interpolated caller data. The validators here are shared so that
//! every engine rejects unsafe input identically; a translator that skips
//! them is a bug, not a variation.

pub mod columnar;
pub mod relational;

use crate::cursor::Cursor;
use crate::error::{StorageError, StorageResult};
use crate::models::{
    AggregateParams, DeleteParams, DistinctParams, QueryParams, RecordFilter, TopValuesParams,
};

/// Hard upper bound on page sizes across all engines.
pub const MAX_QUERY_LIMIT: u64 = 10_000;

/// Maximum length of a `metadata.<key>` key.
const MAX_METADATA_KEY_LEN: usize = 128;

/// Physical columns that dynamic field references may name.
///
/// This allow-list, together with the metadata key pattern below, is the
/// sole defense against SQL injection through dynamically-named fields:
/// everything else a caller controls travels as a bound parameter.
pub const ALLOWED_COLUMNS: [&str; 6] = [
    "org_id",
    "project_id",
    "service",
    "level",
    "trace_id",
    "span_id",
];

/// A validated dynamic field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    /// An allow-listed physical column.
    Column(&'static str),
    /// A `metadata.<key>` lookup; the key is passed to the engine as a
    /// bound parameter, never interpolated.
    Metadata(String),
}

/// Validates a dynamic field name.
///
/// Accepts exactly the allow-listed physical columns and `metadata.<key>`
/// references whose key matches `[A-Za-z_][A-Za-z0-9_.]*` with a bounded
/// length. Everything else is rejected.
///
/// # Errors
///
/// Returns `StorageError::InvalidFieldName` for any other input.
pub fn validate_field_name(field: &str) -> StorageResult<FieldRef> {
    if let Some(&column) = ALLOWED_COLUMNS.iter().find(|&&c| c == field) {
        return Ok(FieldRef::Column(column));
    }

    if let Some(key) = field.strip_prefix("metadata.") {
        if is_valid_metadata_key(key) {
            return Ok(FieldRef::Metadata(key.to_string()));
        }
    }

    Err(StorageError::InvalidFieldName(field.to_string()))
}

fn is_valid_metadata_key(key: &str) -> bool {
    if key.is_empty() || key.len() > MAX_METADATA_KEY_LEN {
        return false;
    }
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Validates a page size.
///
/// Limits and offsets are unsigned throughout the crate, so negativity is
/// ruled out by construction; the runtime check rejects zero and anything
/// above [`MAX_QUERY_LIMIT`].
///
/// # Errors
///
/// Returns `StorageError::InvalidLimit` for an out-of-bounds limit.
pub fn validate_pagination(limit: u64) -> StorageResult<()> {
    if limit == 0 || limit > MAX_QUERY_LIMIT {
        return Err(StorageError::InvalidLimit(limit));
    }
    Ok(())
}

/// Rejects empty array filters.
///
/// An empty array would translate to a predicate matching zero rows and
/// silently mask a caller mistake, so it fails validation instead.
///
/// # Errors
///
/// Returns `StorageError::EmptyArrayFilter` naming the offending column.
pub fn validate_array_filter<T>(column: &'static str, values: &[T]) -> StorageResult<()> {
    if values.is_empty() {
        return Err(StorageError::EmptyArrayFilter(column));
    }
    Ok(())
}

/// The value side of a scalar-or-array filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FilterValue {
    /// Scalar value; translates to an equality predicate.
    Text(String),
    /// Array value; translates to a membership predicate.
    TextList(Vec<String>),
}

/// An internal `(field, value)` filter produced from a `RecordFilter`.
///
/// The operator is implied by the value shape: `Text` becomes `=`,
/// `TextList` becomes the engine's membership predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Filter {
    pub column: &'static str,
    pub value: FilterValue,
}

/// Expands the optional scalar-or-array filters of a `RecordFilter` into
/// the internal filter list, enforcing the empty-array rule along the way.
pub(crate) fn scalar_filters(filter: &RecordFilter) -> StorageResult<Vec<Filter>> {
    let mut filters = Vec::new();

    push_filter(&mut filters, "org_id", filter.org_ids.as_deref())?;
    push_filter(&mut filters, "project_id", filter.project_ids.as_deref())?;
    push_filter(&mut filters, "service", filter.services.as_deref())?;

    if let Some(levels) = &filter.levels {
        validate_array_filter("level", levels)?;
        let values: Vec<String> = levels.iter().map(ToString::to_string).collect();
        filters.push(Filter {
            column: "level",
            value: if values.len() == 1 {
                FilterValue::Text(values.into_iter().next().unwrap_or_default())
            } else {
                FilterValue::TextList(values)
            },
        });
    }

    Ok(filters)
}

fn push_filter(
    filters: &mut Vec<Filter>,
    column: &'static str,
    values: Option<&[String]>,
) -> StorageResult<()> {
    let Some(values) = values else {
        return Ok(());
    };
    validate_array_filter(column, values)?;
    filters.push(Filter {
        column,
        value: if values.len() == 1 {
            FilterValue::Text(values[0].clone())
        } else {
            FilterValue::TextList(values.to_vec())
        },
    });
    Ok(())
}

/// Decodes the opaque cursor carried by query parameters.
///
/// Fail-open: a malformed cursor is treated as absent so that a stale or
/// corrupted pagination token degrades to a first-page query instead of an
/// error.
pub(crate) fn cursor_position(params: &QueryParams) -> Option<Cursor> {
    params.cursor.as_deref().and_then(Cursor::decode)
}

/// Escapes `LIKE` pattern metacharacters in a substring search term.
pub(crate) fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Translates abstract query parameters into engine-native statements.
///
/// `Statement` is the engine's native query representation: SQL text plus
/// positional or named parameters. Implementations must run the shared
/// validators before building any SQL and must never interpolate caller
/// data into the statement text.
pub trait QueryTranslator {
    /// The engine-native statement type.
    type Statement;

    /// Translates a paginated log query.
    ///
    /// The produced statement requests `limit + 1` rows so the engine can
    /// detect a further page without a second count query.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any SQL is built.
    fn translate_query(&self, params: &QueryParams) -> StorageResult<Self::Statement>;

    /// Translates a row count over the same filter surface as a query.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any SQL is built.
    fn translate_count(&self, filter: &RecordFilter) -> StorageResult<Self::Statement>;

    /// Translates a time-bucketed aggregation.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any SQL is built.
    fn translate_aggregate(&self, params: &AggregateParams) -> StorageResult<Self::Statement>;

    /// Translates a distinct-values query over a validated field.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any SQL is built.
    fn translate_distinct(&self, params: &DistinctParams) -> StorageResult<Self::Statement>;

    /// Translates a most-frequent-values query over a validated field.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any SQL is built.
    fn translate_top_values(&self, params: &TopValuesParams) -> StorageResult<Self::Statement>;

    /// Translates a time-range deletion.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any SQL is built.
    fn translate_delete(&self, params: &DeleteParams) -> StorageResult<Self::Statement>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, TimeRange};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_validate_field_name_allows_columns() {
        for column in ALLOWED_COLUMNS {
            assert_eq!(
                validate_field_name(column).unwrap(),
                FieldRef::Column(column)
            );
        }
    }

    #[test]
    fn test_validate_field_name_allows_metadata_keys() {
        assert_eq!(
            validate_field_name("metadata.user_id").unwrap(),
            FieldRef::Metadata("user_id".to_string())
        );
        assert_eq!(
            validate_field_name("metadata.http.status_code").unwrap(),
            FieldRef::Metadata("http.status_code".to_string())
        );
        assert_eq!(
            validate_field_name("metadata._internal").unwrap(),
            FieldRef::Metadata("_internal".to_string())
        );
    }

    #[test]
    fn test_validate_field_name_rejects_unknown_columns() {
        assert!(validate_field_name("message").is_err());
        assert!(validate_field_name("timestamp").is_err());
        assert!(validate_field_name("password").is_err());
    }

    #[test]
    fn test_validate_field_name_rejects_injection_attempts() {
        let attempts = [
            "service; DROP TABLE logs",
            "service'--",
            "service\"",
            "metadata.key'; DELETE FROM logs; --",
            "metadata.key OR 1=1",
            "metadata.key)",
            "level UNION SELECT password FROM users",
            "metadata.",
            "metadata.1key",
            " service",
            "service ",
        ];
        for attempt in attempts {
            assert!(
                validate_field_name(attempt).is_err(),
                "accepted unsafe field {attempt:?}"
            );
        }
    }

    #[test]
    fn test_validate_field_name_rejects_overlong_metadata_key() {
        let field = format!("metadata.{}", "k".repeat(MAX_METADATA_KEY_LEN + 1));
        assert!(validate_field_name(&field).is_err());
    }

    #[test]
    fn test_validate_pagination_bounds() {
        assert!(validate_pagination(1).is_ok());
        assert!(validate_pagination(MAX_QUERY_LIMIT).is_ok());
        assert!(matches!(
            validate_pagination(0).unwrap_err(),
            StorageError::InvalidLimit(0)
        ));
        assert!(validate_pagination(MAX_QUERY_LIMIT + 1).is_err());
    }

    #[test]
    fn test_validate_array_filter_rejects_empty() {
        let empty: Vec<String> = Vec::new();
        assert!(matches!(
            validate_array_filter("service", &empty).unwrap_err(),
            StorageError::EmptyArrayFilter("service")
        ));
        assert!(validate_array_filter("service", &["api".to_string()]).is_ok());
    }

    #[test]
    fn test_scalar_filters_expansion() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        );
        let filter = RecordFilter::new(range)
            .with_org("acme")
            .with_services(vec!["api".to_string(), "worker".to_string()])
            .with_level(Severity::Error);

        let filters = scalar_filters(&filter).unwrap();

        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0].column, "org_id");
        assert_eq!(filters[0].value, FilterValue::Text("acme".to_string()));
        assert_eq!(
            filters[1].value,
            FilterValue::TextList(vec!["api".to_string(), "worker".to_string()])
        );
        assert_eq!(filters[2].value, FilterValue::Text("error".to_string()));
    }

    #[test]
    fn test_scalar_filters_rejects_empty_array() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        );
        let filter = RecordFilter::new(range).with_services(Vec::new());

        assert!(matches!(
            scalar_filters(&filter).unwrap_err(),
            StorageError::EmptyArrayFilter("service")
        ));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\now"), "50\\%\\_off\\\\now");
        assert_eq!(escape_like("plain"), "plain");
    }
}
