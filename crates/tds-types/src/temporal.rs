//! Wire date/time representations to `chrono`.

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use tds_protocol::{Date, DateTime, Time};

use crate::error::TypeError;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

fn invalid(what: &str) -> TypeError {
    TypeError::InvalidDateTime(what.to_owned())
}

fn epoch(year: i32) -> Result<NaiveDate, TypeError> {
    NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| invalid("epoch"))
}

/// DATE: days since 0001-01-01.
pub fn date(value: Date) -> Result<NaiveDate, TypeError> {
    epoch(1)?
        .checked_add_signed(Duration::days(i64::from(value.days)))
        .ok_or_else(|| invalid("date out of range"))
}

/// TIME: nanoseconds since midnight.
pub fn time(value: Time) -> Result<NaiveTime, TypeError> {
    let secs = u32::try_from(value.nanos / NANOS_PER_SECOND).map_err(|_| invalid("time"))?;
    let nanos = (value.nanos % NANOS_PER_SECOND) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| invalid("time out of range"))
}

/// DATETIME / SMALLDATETIME: days since 1900-01-01 plus 1/300 s ticks.
pub fn datetime(value: DateTime) -> Result<NaiveDateTime, TypeError> {
    let day = epoch(1900)?
        .checked_add_signed(Duration::days(i64::from(value.days)))
        .ok_or_else(|| invalid("datetime out of range"))?;
    let nanos = u64::from(value.ticks) * NANOS_PER_SECOND / 300;
    let time = time(Time { nanos, scale: 3 })?;
    Ok(day.and_time(time))
}

/// DATETIME2.
pub fn datetime2(d: Date, t: Time) -> Result<NaiveDateTime, TypeError> {
    Ok(date(d)?.and_time(time(t)?))
}

/// DATETIMEOFFSET: UTC date and time plus an offset in minutes.
pub fn datetime_offset(
    d: Date,
    t: Time,
    offset_minutes: i16,
) -> Result<chrono::DateTime<FixedOffset>, TypeError> {
    let offset = FixedOffset::east_opt(i32::from(offset_minutes) * 60)
        .ok_or_else(|| invalid("offset out of range"))?;
    Ok(offset.from_utc_datetime(&datetime2(d, t)?))
}
