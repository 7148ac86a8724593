//! Wall-clock helpers shared by cache metadata and invalidation events.

use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, UTC.
pub fn unix_millis() -> i64 {
    millis_of(OffsetDateTime::now_utc())
}

pub fn millis_of(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert epoch milliseconds back into a UTC timestamp, if representable.
pub fn from_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}
