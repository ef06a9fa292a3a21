use chrono::{DateTime, SecondsFormat, Utc};

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Format as RFC3339 in UTC with a `Z` suffix (the only form we persist).
pub fn format_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC3339 timestamp, accepting `Z` or a numeric offset, and
/// convert to UTC.
pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value.trim()).map(|parsed| parsed.with_timezone(&Utc))
}
