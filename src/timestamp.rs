//! Sample timestamps.
//!
//! Records carry a single UTC instant, normalized to whole seconds. Storage
//! splits it into a `%Y-%m-%d` date string and a `%H:%M:%S` time string; the
//! wire format exposes epoch seconds. Both conversions are lossless for any
//! normalized instant in the accepted range.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::ValidationError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Largest accepted epoch second (9999-12-31T23:59:59Z). `%Y` stops being a
/// fixed four-digit field past this point.
pub const MAX_EPOCH_SECS: i64 = 253_402_300_799;

/// Drop sub-second precision.
pub fn normalize(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(instant.timestamp(), 0).unwrap_or(instant)
}

pub fn now() -> DateTime<Utc> {
    normalize(Utc::now())
}

pub fn from_epoch_secs(secs: i64) -> Result<DateTime<Utc>, ValidationError> {
    if !(0..=MAX_EPOCH_SECS).contains(&secs) {
        return Err(ValidationError::new(
            "sampledAt",
            format!("epoch seconds {secs} outside 0..={MAX_EPOCH_SECS}"),
        ));
    }
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ValidationError::new("sampledAt", format!("unrepresentable instant {secs}")))
}

pub fn to_epoch_secs(instant: DateTime<Utc>) -> i64 {
    instant.timestamp()
}

/// Split an instant into its UTC date and time strings.
pub fn split(instant: DateTime<Utc>) -> (String, String) {
    let instant = normalize(instant);
    (
        instant.format(DATE_FORMAT).to_string(),
        instant.format(TIME_FORMAT).to_string(),
    )
}

/// Recombine date and time strings written by [`split`].
pub fn join(date: &str, time: &str) -> Result<DateTime<Utc>, ValidationError> {
    let combined = format!("{date} {time}");
    let naive = NaiveDateTime::parse_from_str(&combined, &format!("{DATE_FORMAT} {TIME_FORMAT}"))
        .map_err(|e| ValidationError::new("timestamp", format!("'{combined}': {e}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub fn ensure_in_range(instant: DateTime<Utc>) -> Result<(), ValidationError> {
    from_epoch_secs(instant.timestamp()).map(|_| ())
}
