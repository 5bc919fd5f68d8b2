//! Storage timestamp encoding shared by both backends.
//!
//! RFC 3339 in UTC with nanosecond precision and a `Z` suffix. The width is
//! fixed, so lexicographic order equals chronological order and `updated_at`
//! columns and index values can be compared as plain strings.

use chrono::{DateTime, SecondsFormat, Utc};
use waypoint_types::error::RepositoryError;

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime '{s}': {e}")))
}
