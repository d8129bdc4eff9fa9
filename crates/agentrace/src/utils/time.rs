use time::{OffsetDateTime, UtcOffset};

const NANOS_PER_MILLI: i128 = 1_000_000;

#[must_use]
pub fn now_unix_ms() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}

#[must_use]
pub fn now_utc_iso() -> String {
    format_unix_ms(now_unix_ms())
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-02-05T07:00:03.042Z`.
#[must_use]
pub fn format_unix_ms(timestamp_unix_ms: u64) -> String {
    let nanos = i128::from(timestamp_unix_ms).saturating_mul(1_000_000);
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

/// Converts a Unix-nanosecond reading into ISO-8601, substituting the current
/// wall clock when the value is missing or non-positive.
#[must_use]
pub fn unix_nanos_to_iso_or_now(nanos: Option<i128>) -> String {
    match nanos {
        Some(value) if value > 0 => u64::try_from(value / NANOS_PER_MILLI)
            .map_or_else(|_| now_utc_iso(), format_unix_ms),
        _ => now_utc_iso(),
    }
}
