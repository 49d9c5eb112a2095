//! Timestamp helpers.
//!
//! Every timestamp the store produces is truncated to microseconds so that a
//! value survives the JSONL and SQLite round trips unchanged.

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};

/// Current time, truncated to microsecond precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp for a mutation of a record last touched at `previous`.
///
/// Strictly later than `previous` even when the wall clock is behind it.
pub fn advance(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    let floor = previous.trunc_subsecs(6) + TimeDelta::microseconds(1);
    if now > floor { now } else { floor }
}

/// Fixed-width text form used in the index; lexical order equals time order.
pub fn to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`to_sql`] (any RFC 3339 value is accepted).
pub fn from_sql(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
