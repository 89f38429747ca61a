//! Row decoding and value encoding helpers shared by the table modules.

use std::fmt::Display;

use autopress_shared::AutopressError;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::Row;

/// Map a libSQL error into the storage error model. Lock contention is
/// reported as the store being unavailable, everything else as a query error.
pub(crate) fn db_err(e: libsql::Error) -> AutopressError {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("database is locked") || lower.contains("busy") {
        AutopressError::StoreUnavailable(msg)
    } else {
        AutopressError::Storage(msg)
    }
}

/// Wrap a decode failure for a column.
pub(crate) fn decode_err(column: &str, e: impl Display) -> AutopressError {
    AutopressError::Storage(format!("failed to decode column '{column}': {e}"))
}

/// Fixed-width RFC 3339 UTC with millisecond precision. Text comparison of two
/// encoded values orders them chronologically.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(ts)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, AutopressError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AutopressError::Storage(format!("failed to parse timestamp '{s}': {e}")))
}

pub(crate) fn get_string(row: &Row, idx: i32) -> Result<String, AutopressError> {
    row.get::<String>(idx).map_err(db_err)
}

/// Read a nullable TEXT column. `row.get::<String>` fails on NULL.
pub(crate) fn get_opt_string(row: &Row, idx: i32) -> Result<Option<String>, AutopressError> {
    match row.get::<Option<String>>(idx).map_err(db_err)? {
        Some(s) if s.is_empty() => Ok(None),
        other => Ok(other),
    }
}

pub(crate) fn get_i64(row: &Row, idx: i32) -> Result<i64, AutopressError> {
    row.get::<i64>(idx).map_err(db_err)
}

/// Counters are stored as INTEGER; negative values never occur.
pub(crate) fn get_u64(row: &Row, idx: i32) -> Result<u64, AutopressError> {
    let v = get_i64(row, idx)?;
    u64::try_from(v).map_err(|e| decode_err("counter", e))
}

pub(crate) fn get_bool(row: &Row, idx: i32) -> Result<bool, AutopressError> {
    Ok(get_i64(row, idx)? != 0)
}

pub(crate) fn get_ts(row: &Row, idx: i32) -> Result<DateTime<Utc>, AutopressError> {
    parse_ts(&get_string(row, idx)?)
}

pub(crate) fn get_opt_ts(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>, AutopressError> {
    get_opt_string(row, idx)?
        .as_deref()
        .map(parse_ts)
        .transpose()
}

/// Parse a TEXT column with the type's `FromStr`.
pub(crate) fn get_parsed<T>(row: &Row, idx: i32) -> Result<T, AutopressError>
where
    T: std::str::FromStr,
    T::Err: Display,
{
    let raw = get_string(row, idx)?;
    raw.parse::<T>().map_err(|e| decode_err(&raw, e))
}

pub(crate) fn get_opt_parsed<T>(row: &Row, idx: i32) -> Result<Option<T>, AutopressError>
where
    T: std::str::FromStr,
    T::Err: Display,
{
    get_opt_string(row, idx)?
        .map(|raw| raw.parse::<T>().map_err(|e| decode_err(&raw, e)))
        .transpose()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, AutopressError> {
    serde_json::to_string(value).map_err(|e| AutopressError::Storage(format!("encode json: {e}")))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, AutopressError> {
    serde_json::from_str(s).map_err(|e| AutopressError::Storage(format!("decode json: {e}")))
}

/// Convert an unsigned counter into an INTEGER parameter.
pub(crate) fn int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_fixed_width_and_sortable() {
        let a = parse_ts("2026-10-16T09:05:00Z").expect("parse");
        let b = parse_ts("2026-10-16T10:00:00.5Z").expect("parse");
        let (ea, eb) = (ts(a), ts(b));
        assert_eq!(ea, "2026-10-16T09:05:00.000Z");
        assert_eq!(ea.len(), eb.len());
        assert!(ea < eb);
        assert_eq!(parse_ts(&eb).expect("roundtrip"), b);
    }
}
