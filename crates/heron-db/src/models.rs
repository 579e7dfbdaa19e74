use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;
use uuid::Uuid;

/// Timestamps are stored as RFC 3339 text with millisecond precision, so
/// lexicographic order in SQL matches chronological order.
pub(crate) fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current wall-clock time truncated to the stored precision, so in-memory
/// comparisons against persisted values are exact.
pub(crate) fn now_ts() -> DateTime<Utc> {
    parse_ts(&format_ts(Utc::now()))
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", s, e);
            DateTime::default()
        })
}

pub(crate) fn parse_uuid(s: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}': {}", s, e);
        Uuid::default()
    })
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub password: String,
    pub followers_count: i64,
    pub following_count: i64,
    pub created_at: String,
}
