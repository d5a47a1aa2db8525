//! Timestamp parsing for source records.
//!
//! Source tools disagree on how they write time: some emit RFC 3339
//! strings, some bare dates, most emit epoch milliseconds.

use crate::error::{MigrationError, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Values below this are treated as epoch seconds, above as milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// A timestamp exactly as it appeared in a source listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceTimestamp {
    Epoch(i64),
    Text(String),
}

impl SourceTimestamp {
    /// Resolve to UTC.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming `field_name` if the value cannot be parsed.
    pub fn resolve(&self, field_name: &str) -> Result<DateTime<Utc>> {
        match self {
            Self::Epoch(value) => from_epoch(*value, field_name),
            Self::Text(text) => parse_flexible_timestamp(text, field_name),
        }
    }
}

/// Parse a flexible time specification into a `DateTime<Utc>`.
///
/// Supports:
/// - RFC3339: `2025-01-15T12:00:00Z`, `2025-01-15T12:00:00+00:00`
/// - Simple date: `2025-01-15` (midnight UTC)
/// - Epoch seconds or milliseconds written as a string: `1735689600000`
///
/// # Errors
///
/// Returns an error if the format is unrecognized or out of range.
pub fn parse_flexible_timestamp(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive_dt));
        }
    }

    if let Ok(value) = s.parse::<i64>() {
        return from_epoch(value, field_name);
    }

    Err(MigrationError::validation(
        field_name,
        "invalid time format (expected RFC 3339, YYYY-MM-DD or epoch millis)",
    ))
}

fn from_epoch(value: i64, field_name: &str) -> Result<DateTime<Utc>> {
    let parsed = if value.abs() >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    };
    parsed.ok_or_else(|| MigrationError::validation(field_name, "timestamp out of range"))
}

/// Resolve an optional source timestamp, falling back to `default` when absent or bad.
///
/// Returns the resolved time and, when the value was present but unusable,
/// the reason it was ignored.
#[must_use]
pub fn resolve_or(
    value: Option<&SourceTimestamp>,
    field_name: &str,
    default: DateTime<Utc>,
) -> (DateTime<Utc>, Option<String>) {
    match value.map(|v| v.resolve(field_name)) {
        None => (default, None),
        Some(Ok(dt)) => (dt, None),
        Some(Err(e)) => (default, Some(e.to_string())),
    }
}
