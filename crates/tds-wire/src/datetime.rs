//! Datetime wire encoding.
//!
//! The server counts days from 1900-01-01 and sub-day time in 1/300-second
//! ticks (datetime) or whole minutes (smalldatetime). Day/date conversion
//! uses the Fliegel–van Flandern Julian-day algorithm with the fixed
//! offset 2415021 (the Julian day number of the 1900-01-01 epoch); the
//! integer arithmetic below defines the epoch behavior and must not be
//! replaced with a library conversion.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tds_values::TypeError;

use crate::Result;

/// Julian day number of 1900-01-01.
const EPOCH_JDN: i32 = 2_415_021;

/// 1/300-second ticks per hour.
const TICKS_PER_HOUR: i32 = 1_080_000;

/// 1/300-second ticks per minute.
const TICKS_PER_MINUTE: i32 = 18_000;

/// Convert a day count since 1900-01-01 to (year, month, day).
#[must_use]
pub fn days_to_ymd(days: i32) -> (i32, u32, u32) {
    let mut l = days + 68_569 + EPOCH_JDN;
    let n = 4 * l / 146_097;
    l -= (146_097 * n + 3) / 4;
    let mut i = 4000 * (l + 1) / 1_461_001;
    l = l - 1461 * i / 4 + 31;
    let mut j = 80 * l / 2447;
    let k = l - 2447 * j / 80;
    l = j / 11;
    j = j + 2 - 12 * l;
    i = 100 * (n - 49) + i + l;
    (i, j as u32, k as u32)
}

/// Convert (year, month, day) to a day count since 1900-01-01.
#[must_use]
pub fn ymd_to_days(year: i32, month: u32, day: u32) -> i32 {
    let y = year;
    let m = month as i32;
    let d = day as i32;
    d - 32_075 + 1461 * (y + 4800 + (m - 14) / 12) / 4 + 367 * (m - 2 - (m - 14) / 12 * 12) / 12
        - 3 * ((y + 4900 + (m - 14) / 12) / 100) / 4
        - EPOCH_JDN
}

/// Decode an 8-byte datetime: signed day count plus 1/300-second ticks.
///
/// The millisecond is recovered with rounded division; this is one of the
/// two rounding modes the protocol requires (the smalldatetime path
/// truncates instead).
pub fn decode_datetime(days: i32, mut ticks: i32) -> Result<NaiveDateTime> {
    let (year, month, day) = days_to_ymd(days);

    let hours = ticks / TICKS_PER_HOUR;
    ticks %= TICKS_PER_HOUR;
    let minutes = ticks / TICKS_PER_MINUTE;
    ticks %= TICKS_PER_MINUTE;
    let seconds = ticks / 300;
    ticks %= 300;
    let millis = (ticks * 1000 + 150) / 300;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| {
            d.and_hms_milli_opt(hours as u32, minutes as u32, seconds as u32, millis as u32)
        })
        .ok_or_else(|| {
            TypeError::InvalidDateTime {
                days,
                time: (hours * TICKS_PER_HOUR) as u32,
            }
            .into()
        })
}

/// Encode a datetime into its signed day count and 1/300-second ticks.
///
/// Milliseconds are converted to ticks with rounded division, mirroring
/// the decode path.
#[must_use]
pub fn encode_datetime(value: NaiveDateTime) -> (i32, i32) {
    use chrono::Datelike;

    let date = value.date();
    let days = ymd_to_days(date.year(), date.month(), date.day());

    let millis = (value.nanosecond() / 1_000_000) as i32;
    let mut ticks = value.hour() as i32 * TICKS_PER_HOUR
        + value.minute() as i32 * TICKS_PER_MINUTE
        + value.second() as i32 * 300;
    ticks += (millis * 300 + 500) / 1000;

    (days, ticks)
}

/// Decode a 4-byte smalldatetime: unsigned day count plus minute-of-day.
pub fn decode_smalldatetime(days: u16, minutes: u16) -> Result<NaiveDateTime> {
    let (year, month, day) = days_to_ymd(i32::from(days));

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(u32::from(minutes) / 60, u32::from(minutes) % 60, 0))
        .ok_or_else(|| {
            TypeError::InvalidDateTime {
                days: i32::from(days),
                time: u32::from(minutes),
            }
            .into()
        })
}

/// Encode a smalldatetime, truncating seconds and milliseconds.
///
/// Truncation (rather than rounding) here is deliberate and matches the
/// wire behavior for the 4-byte form.
pub fn encode_smalldatetime(value: NaiveDateTime) -> Result<(u16, u16)> {
    use chrono::Datelike;

    let date = value.date();
    let days = ymd_to_days(date.year(), date.month(), date.day());
    if !(0..=0xFFFF).contains(&days) {
        return Err(TypeError::InvalidDateTime {
            days,
            time: 0,
        }
        .into());
    }

    let minutes = value.hour() * 60 + value.minute();
    Ok((days as u16, minutes as u16))
}
