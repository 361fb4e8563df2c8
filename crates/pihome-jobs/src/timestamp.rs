//! Timestamp encoding for the database.
//!
//! Stored as RFC 3339 UTC text with fixed millisecond precision, so
//! comparing the text compares the instants.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn opt_from_db(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| from_db(idx, &s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_text_order_is_time_order() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 9, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        assert!(to_db(a) < to_db(b));
        assert_eq!(to_db(b), "2026-01-01T10:00:00.000Z");
    }

    #[test]
    fn test_parse_back() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(from_db(0, &to_db(ts)).unwrap(), ts);
        assert!(from_db(0, "yesterday").is_err());
        assert_eq!(opt_from_db(0, None).unwrap(), None);
    }
}
