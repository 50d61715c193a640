//! Date/time types.
//!
//! PostgreSQL stores timestamps as microseconds since 2000-01-01 00:00:00
//! UTC (or as IEEE-754 seconds since the same epoch on servers built with
//! `integer_datetimes=off`), dates as days since 2000-01-01, and times as
//! microseconds since midnight. The format switch is honored at
//! decode/encode time, never when the codec table is built.

use std::fmt;

/// Difference between the PostgreSQL epoch (2000-01-01) and the Unix epoch
/// (1970-01-01), in microseconds.
pub const PG_EPOCH_OFFSET_USEC: i64 = 946_684_800_000_000;

const USEC_PER_DAY: i64 = 86_400_000_000;

/// Date as days since 2000-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date {
    pub days: i32,
}

impl Date {
    pub fn from_pg_days(days: i32) -> Self {
        Self { days }
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Self {
        Self { days: days_from_ymd(year, month as i32, day as i32) }
    }

    /// Civil (year, month, day) components.
    pub fn ymd(&self) -> (i32, u32, u32) {
        ymd_from_days(self.days)
    }

    pub(crate) fn parse_text(s: &str) -> Result<Self, String> {
        let parts: Vec<i32> = s.split('-').filter_map(|p| p.parse().ok()).collect();
        if parts.len() != 3 {
            return Err(format!("invalid date: {:?}", s));
        }
        Ok(Date { days: days_from_ymd(parts[0], parts[1], parts[2]) })
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, m, d) = self.ymd();
        write!(f, "{:04}-{:02}-{:02}", y, m, d)
    }
}

/// Time of day as microseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    pub usec: i64,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8, usec: u32) -> Self {
        Self {
            usec: hour as i64 * 3_600_000_000
                + minute as i64 * 60_000_000
                + second as i64 * 1_000_000
                + usec as i64,
        }
    }

    pub fn hour(&self) -> u8 {
        ((self.usec / 3_600_000_000) % 24) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.usec / 60_000_000) % 60) as u8
    }

    pub fn second(&self) -> u8 {
        ((self.usec / 1_000_000) % 60) as u8
    }

    pub fn microsecond(&self) -> u32 {
        (self.usec % 1_000_000) as u32
    }

    pub(crate) fn parse_text(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 {
            return Err(format!("invalid time: {:?}", s));
        }
        let hour: i64 = parts[0].parse().map_err(|_| format!("invalid hour in {:?}", s))?;
        let minute: i64 = parts[1].parse().map_err(|_| format!("invalid minute in {:?}", s))?;
        let (second, usec) = match parts.get(2) {
            Some(sec) => {
                let mut it = sec.splitn(2, '.');
                let whole: i64 = it
                    .next()
                    .unwrap_or("0")
                    .parse()
                    .map_err(|_| format!("invalid seconds in {:?}", s))?;
                let frac = it
                    .next()
                    .map(|frac| {
                        let padded = format!("{:0<6}", frac);
                        padded[..6].parse::<i64>().unwrap_or(0)
                    })
                    .unwrap_or(0);
                (whole, frac)
            }
            None => (0, 0),
        };
        Ok(Time {
            usec: hour * 3_600_000_000 + minute * 60_000_000 + second * 1_000_000 + usec,
        })
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour(), self.minute(), self.second())?;
        if self.microsecond() != 0 {
            write!(f, ".{:06}", self.microsecond())?;
        }
        Ok(())
    }
}

/// Timestamp as microseconds since 2000-01-01 00:00:00.
///
/// The same representation serves `timestamp` and `timestamptz`; a
/// `timestamptz` value is always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub usec: i64,
}

impl Timestamp {
    pub fn from_pg_usec(usec: i64) -> Self {
        Self { usec }
    }

    pub fn from_unix_secs(secs: i64) -> Self {
        Self { usec: secs * 1_000_000 - PG_EPOCH_OFFSET_USEC }
    }

    pub fn to_unix_secs(&self) -> i64 {
        (self.usec + PG_EPOCH_OFFSET_USEC).div_euclid(1_000_000)
    }

    pub fn to_unix_usec(&self) -> i64 {
        self.usec + PG_EPOCH_OFFSET_USEC
    }

    /// Compose from a civil date and a time of day.
    pub fn from_date_time(date: Date, time: Time) -> Self {
        Self { usec: date.days as i64 * USEC_PER_DAY + time.usec }
    }

    /// Split into civil date and time of day.
    pub fn date_time(&self) -> (Date, Time) {
        let days = self.usec.div_euclid(USEC_PER_DAY);
        let rem = self.usec.rem_euclid(USEC_PER_DAY);
        (Date { days: days as i32 }, Time { usec: rem })
    }

    /// Parse an ISO text timestamp, honoring a trailing `+HH[:MM]` /
    /// `-HH[:MM]` zone offset by normalizing to UTC.
    pub(crate) fn parse_text(s: &str) -> Result<Self, String> {
        let mut body = s;
        let mut offset_secs: i64 = 0;

        // Scan for a zone suffix after the date part; the date itself
        // contains '-' separators, so only look past the first space or 'T'.
        if let Some(time_start) = body.find([' ', 'T']) {
            let time_part = &body[time_start + 1..];
            if let Some(idx) = time_part.find(['+', '-']) {
                let (_, zone) = time_part.split_at(idx);
                let sign: i64 = if zone.starts_with('-') { -1 } else { 1 };
                let digits: Vec<&str> = zone[1..].split(':').collect();
                let hours: i64 = digits
                    .first()
                    .and_then(|h| h.parse().ok())
                    .ok_or_else(|| format!("invalid zone offset in {:?}", s))?;
                let minutes: i64 = digits.get(1).and_then(|m| m.parse().ok()).unwrap_or(0);
                offset_secs = sign * (hours * 3600 + minutes * 60);
                body = &s[..time_start + 1 + idx];
            }
        }

        let mut it = body.splitn(2, [' ', 'T']);
        let date_part = it.next().ok_or_else(|| format!("invalid timestamp: {:?}", s))?;
        let time_part = it.next().ok_or_else(|| format!("invalid timestamp: {:?}", s))?;
        let date = Date::parse_text(date_part)?;
        let time = Time::parse_text(time_part)?;

        let local = Self::from_date_time(date, time);
        Ok(Self { usec: local.usec - offset_secs * 1_000_000 })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (date, time) = self.date_time();
        write!(f, "{} {}", date, time)
    }
}

/// Interval as (months, days, microseconds), matching the wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub usec: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, usec: i64) -> Self {
        Self { months, days, usec }
    }
}

/// Days from 2000-01-01 to the given civil date.
pub(crate) fn days_from_ymd(year: i32, month: i32, day: i32) -> i32 {
    let mut days = 0;
    for y in 2000..year {
        days += if is_leap_year(y) { 366 } else { 365 };
    }
    for y in year..2000 {
        days -= if is_leap_year(y) { 366 } else { 365 };
    }
    let days_in_month = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    for m in 1..month {
        days += days_in_month[(m - 1) as usize];
        if m == 2 && is_leap_year(year) {
            days += 1;
        }
    }
    days + day - 1
}

/// Civil date for a day count relative to 2000-01-01.
pub(crate) fn ymd_from_days(days: i32) -> (i32, u32, u32) {
    let mut year = 2000;
    let mut remaining = days;
    while remaining < 0 {
        year -= 1;
        remaining += if is_leap_year(year) { 366 } else { 365 };
    }
    loop {
        let in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining < in_year {
            break;
        }
        remaining -= in_year;
        year += 1;
    }
    let days_in_month = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 1;
    for (i, &len) in days_in_month.iter().enumerate() {
        let mut len = len;
        if i == 1 && is_leap_year(year) {
            len += 1;
        }
        if remaining < len {
            month = i as i32 + 1;
            break;
        }
        remaining -= len;
    }
    (year, month as u32, remaining as u32 + 1)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
