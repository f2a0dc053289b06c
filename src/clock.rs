//! Conversion of the thermostat's report timestamps.
//!
//! The local protocol counts seconds from 2000-01-01T00:00:00Z instead of the
//! Unix epoch. Older clients shifted by "30 calendar years" instead, which is
//! the same 10957 days unless the 30-year window holds an extra February 29,
//! in which case it lands one day late. The fixed offset is what the device
//! means.

use chrono::{DateTime, Local, TimeZone, Utc};

/// Seconds between the Unix epoch and the device epoch (2000-01-01 UTC).
pub const DEVICE_EPOCH_OFFSET_SECS: i64 = 946_684_800;

const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Device timestamp as an instant. `None` only for values beyond chrono's range.
pub fn to_utc(device_seconds: i64) -> Option<DateTime<Utc>> {
    let unix = device_seconds.checked_add(DEVICE_EPOCH_OFFSET_SECS)?;
    Utc.timestamp_opt(unix, 0).single()
}

/// Device timestamp in the host's time zone.
pub fn to_calendar_time(device_seconds: i64) -> Option<DateTime<Local>> {
    to_utc(device_seconds).map(|t| t.with_timezone(&Local))
}

/// `YYYY-MM-DD HH:MM:SS`, zero padded, no locale involved.
pub fn format_canonical<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(CANONICAL_FORMAT).to_string()
}
