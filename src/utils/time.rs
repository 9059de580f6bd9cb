use jiff::{Timestamp, tz::Offset};

/// Milliseconds since the Unix epoch, truncated toward zero.
///
/// Both `as_second` and `subsec_millisecond` carry the sign of the instant, so the sum never
/// rounds a pre-1970 value away from zero.
#[inline]
pub fn epoch_millis(ts: Timestamp) -> i64 {
    ts.as_second() * 1_000 + i64::from(ts.subsec_millisecond())
}

/// Renders `ts` as `YYYY-MM-DD HH:mm:ss.fff` in UTC.
pub fn format_timestamp(ts: Timestamp) -> String {
    let dt = Offset::UTC.to_datetime(ts);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.subsec_nanosecond() / 1_000_000
    )
}

/// Parses an EVTX `SystemTime` attribute (RFC 3339, `Z` suffixed, up to 9 fractional digits).
pub fn parse_system_time(value: &str) -> Option<Timestamp> {
    value.trim().parse::<Timestamp>().ok()
}
