//! Opaque keyset pagination cursor.
//!
//! The wire format is base64 of the UTF-8 string
//! `"<RFC 3339 timestamp>,<row id>"`, encoding the last row of the
//! previous page. The format is part of the external service contract:
//! cursors are returned to HTTP clients and resubmitted verbatim.
//!
//! Decoding is fail-open: a malformed cursor means "no cursor", never an
//! error. Pagination state is cosmetic; filtering is not, and filter
//! validation stays fail-closed elsewhere.

use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// The decoded `(timestamp, id)` position of the last row of a page.
///
/// The tuple orders the same way as the active sort order over
/// `(timestamp, id)`, which is what makes keyset pagination stable under
/// concurrent inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Timestamp of the last row.
    pub timestamp: DateTime<Utc>,
    /// Id of the last row.
    pub id: Uuid,
}

impl Cursor {
    /// Creates a cursor from the last row of a page.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, id: Uuid) -> Self {
        Self { timestamp, id }
    }

    /// Encodes the cursor into its opaque wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let raw = format!(
            "{},{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.id
        );
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    /// Decodes an opaque cursor, returning `None` for anything malformed:
    /// bad base64, bad UTF-8, a missing separator, an unparseable
    /// timestamp, or an unparseable id.
    #[must_use]
    pub fn decode(value: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(value)
            .ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        let (ts, id) = raw.split_once(',')?;
        let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
        let id = Uuid::parse_str(id).ok()?;
        Some(Self { timestamp, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = Cursor::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 37, 12).unwrap(),
            Uuid::new_v4(),
        );

        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_preserves_nanoseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 14, 37, 12).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let cursor = Cursor::new(ts, Uuid::new_v4());

        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.timestamp, ts);
    }

    #[test]
    fn test_cursor_wire_format() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let cursor = Cursor::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), id);

        let encoded = cursor.encode();
        let raw = String::from_utf8(
            base64::engine::general_purpose::STANDARD
                .decode(&encoded)
                .unwrap(),
        )
        .unwrap();

        assert_eq!(
            raw,
            "2024-01-01T00:00:00.000000000Z,550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_cursor_decode_garbage_is_none() {
        assert!(Cursor::decode("not base64 at all!").is_none());
        assert!(Cursor::decode("").is_none());
    }

    #[test]
    fn test_cursor_decode_missing_separator_is_none() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("2024-01-01T00:00:00Z");
        assert!(Cursor::decode(&encoded).is_none());
    }

    #[test]
    fn test_cursor_decode_bad_timestamp_is_none() {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode("yesterday,550e8400-e29b-41d4-a716-446655440000");
        assert!(Cursor::decode(&encoded).is_none());
    }

    #[test]
    fn test_cursor_decode_bad_id_is_none() {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode("2024-01-01T00:00:00Z,not-a-uuid");
        assert!(Cursor::decode(&encoded).is_none());
    }
}
