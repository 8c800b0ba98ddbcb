//! Temporal values: calendar times packed into a `u64`, and durations.

use std::fmt;

use chrono::{Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::error::{CodecError, CodecResult};

pub const MAX_FSP: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeKind {
    Date,
    Datetime,
    /// Stored in UTC; encoders convert from the session zone first.
    Timestamp,
}

/// A calendar time with microsecond precision.
///
/// The all-zero value is the "zero date" and has no chrono equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    microsecond: u32,
    kind: TimeKind,
    fsp: u8,
}

impl Time {
    pub fn zero(kind: TimeKind) -> Self {
        Self {
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            microsecond: 0,
            kind,
            fsp: 0,
        }
    }

    pub fn from_naive(kind: TimeKind, dt: NaiveDateTime, fsp: u8) -> CodecResult<Self> {
        if fsp > MAX_FSP {
            return Err(CodecError::InvalidTime(format!("fsp {fsp} out of range")));
        }
        let year = u16::try_from(dt.year())
            .ok()
            .filter(|y| *y <= 9999)
            .ok_or_else(|| CodecError::InvalidTime(format!("year {} out of range", dt.year())))?;
        let date_only = kind == TimeKind::Date;
        Ok(Self {
            year,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: if date_only { 0 } else { dt.hour() as u8 },
            minute: if date_only { 0 } else { dt.minute() as u8 },
            second: if date_only { 0 } else { dt.second() as u8 },
            microsecond: if date_only { 0 } else { dt.nanosecond() / 1_000 % 1_000_000 },
            kind,
            fsp: if date_only { 0 } else { fsp },
        })
    }

    pub fn date(year: i32, month: u32, day: u32) -> CodecResult<Self> {
        let d = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| CodecError::InvalidTime(format!("{year}-{month}-{day}")))?;
        Self::from_naive(TimeKind::Date, d.and_time(chrono::NaiveTime::MIN), 0)
    }

    pub fn kind(&self) -> TimeKind {
        self.kind
    }

    pub fn fsp(&self) -> u8 {
        self.fsp
    }

    pub fn is_zero(&self) -> bool {
        self.to_packed() == 0
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))?
            .and_hms_micro_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
                self.microsecond,
            )
    }

    /// Pack the fields so that unsigned order equals chronological order.
    pub fn to_packed(&self) -> u64 {
        let ymd = ((u64::from(self.year) * 13 + u64::from(self.month)) << 5) | u64::from(self.day);
        let hms = (u64::from(self.hour) << 12) | (u64::from(self.minute) << 6) | u64::from(self.second);
        (((ymd << 17) | hms) << 24) | u64::from(self.microsecond)
    }

    pub fn from_packed(kind: TimeKind, fsp: u8, packed: u64) -> CodecResult<Self> {
        if packed == 0 {
            return Ok(Self { kind, fsp, ..Self::zero(kind) });
        }
        let ymdhms = packed >> 24;
        let ymd = ymdhms >> 17;
        let ym = ymd >> 5;
        let hms = ymdhms & ((1 << 17) - 1);
        let time = Self {
            year: u16::try_from(ym / 13).map_err(|_| CodecError::InvalidTime(format!("packed {packed}")))?,
            month: (ym % 13) as u8,
            day: (ymd & 31) as u8,
            hour: (hms >> 12) as u8,
            minute: ((hms >> 6) & 63) as u8,
            second: (hms & 63) as u8,
            microsecond: (packed % (1 << 24)) as u32,
            kind,
            fsp: fsp.min(MAX_FSP),
        };
        if time.month > 12
            || time.day > 31
            || time.hour > 23
            || time.minute > 59
            || time.second > 59
            || time.microsecond >= 1_000_000
        {
            return Err(CodecError::InvalidTime(format!("packed {packed}")));
        }
        Ok(time)
    }

    /// Convert a timestamp expressed in `tz` into UTC. Other kinds, the zero
    /// value and UTC zones pass through.
    pub fn to_utc(self, tz: &Tz) -> CodecResult<Self> {
        if self.kind != TimeKind::Timestamp || *tz == Tz::UTC || self.is_zero() {
            return Ok(self);
        }
        let naive = self.require_naive()?;
        let utc = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.naive_utc(),
            LocalResult::None => {
                return Err(CodecError::InvalidTime(format!("{naive} does not exist in {tz}")));
            }
        };
        Self::from_naive(self.kind, utc, self.fsp)
    }

    /// Inverse of [`Time::to_utc`].
    pub fn from_utc(self, tz: &Tz) -> CodecResult<Self> {
        if self.kind != TimeKind::Timestamp || *tz == Tz::UTC || self.is_zero() {
            return Ok(self);
        }
        let naive = self.require_naive()?;
        Self::from_naive(self.kind, tz.from_utc_datetime(&naive).naive_local(), self.fsp)
    }

    fn require_naive(&self) -> CodecResult<NaiveDateTime> {
        self.to_naive()
            .ok_or_else(|| CodecError::InvalidTime(format!("{self} is not a valid calendar time")))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)?;
        if self.kind == TimeKind::Date {
            return Ok(());
        }
        write!(f, " {:02}:{:02}:{:02}", self.hour, self.minute, self.second)?;
        if self.fsp > 0 {
            let frac = format!("{:06}", self.microsecond);
            write!(f, ".{}", &frac[..usize::from(self.fsp)])?;
        }
        Ok(())
    }
}

/// A signed time span in nanoseconds with a display precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Duration {
    nanos: i64,
    fsp: u8,
}

impl Duration {
    pub fn new(nanos: i64, fsp: u8) -> Self {
        Self {
            nanos,
            fsp: fsp.min(MAX_FSP),
        }
    }

    pub fn nanos(&self) -> i64 {
        self.nanos
    }

    pub fn fsp(&self) -> u8 {
        self.fsp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn packing_round_trips_and_orders() {
        let a = Time::from_naive(TimeKind::Datetime, dt("2024-02-29 23:59:59.123456"), 6).unwrap();
        let b = Time::from_naive(TimeKind::Datetime, dt("2024-03-01 00:00:00.0"), 6).unwrap();
        assert!(a.to_packed() < b.to_packed());
        assert_eq!(Time::from_packed(TimeKind::Datetime, 6, a.to_packed()).unwrap(), a);
        assert_eq!(a.to_string(), "2024-02-29 23:59:59.123456");
    }

    #[test]
    fn zero_time_packs_to_zero() {
        let z = Time::zero(TimeKind::Datetime);
        assert_eq!(z.to_packed(), 0);
        assert!(z.to_naive().is_none());
        assert_eq!(Time::from_packed(TimeKind::Datetime, 0, 0).unwrap(), z);
    }

    #[test]
    fn timestamp_zone_conversion_round_trips() {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        let local = Time::from_naive(TimeKind::Timestamp, dt("2024-06-01 08:00:00.0"), 0).unwrap();
        let utc = local.to_utc(&tz).unwrap();
        assert_eq!(utc.to_string(), "2024-06-01 00:00:00");
        assert_eq!(utc.from_utc(&tz).unwrap(), local);

        let datetime = Time::from_naive(TimeKind::Datetime, dt("2024-06-01 08:00:00.0"), 0).unwrap();
        assert_eq!(datetime.to_utc(&tz).unwrap(), datetime);
    }

    #[test]
    fn nonexistent_local_time_fails() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let gap = Time::from_naive(TimeKind::Timestamp, dt("2024-03-10 02:30:00.0"), 0).unwrap();
        assert!(matches!(gap.to_utc(&tz), Err(CodecError::InvalidTime(_))));
    }

    #[test]
    fn corrupt_packed_value_fails() {
        let ymd = ((2024u64 * 13 + 1) << 5) | 1;
        let bad = ((ymd << 17) | (25 << 12)) << 24;
        assert!(Time::from_packed(TimeKind::Datetime, 0, bad).is_err());
    }
}
