use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable watermark for one external source stream.
///
/// `cursor_value` is an RFC 3339 UTC timestamp normalized to second
/// precision (see [`format_cursor`]) so that lexicographic order matches
/// chronological order; the store relies on this for its monotonic guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCursor {
    pub id: Uuid,
    pub source: String,
    pub cursor_value: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    /// Parse the cursor value back into a timestamp, if present and valid.
    pub fn position(&self) -> Option<DateTime<Utc>> {
        self.cursor_value
            .as_deref()
            .and_then(parse_cursor)
    }
}

/// Normalize a timestamp into the canonical cursor encoding.
pub fn format_cursor(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a canonical cursor value.
pub fn parse_cursor(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_cursor_is_second_precision_utc() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(format_cursor(ts), "2026-03-14T09:26:53Z");
    }

    #[test]
    fn canonical_cursors_sort_chronologically_as_text() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 6).unwrap();
        assert!(format_cursor(earlier) < format_cursor(later));
    }

    #[test]
    fn parse_cursor_round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_cursor(&format_cursor(ts)), Some(ts));
    }

    #[test]
    fn parse_cursor_rejects_garbage() {
        assert!(parse_cursor("not-a-timestamp").is_none());
    }
}
