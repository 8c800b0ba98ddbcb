//! Daily schedule window.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A time-of-day period during which expiry jobs may run.
///
/// When `start > end` the window wraps midnight (e.g. `22:00`–`04:00`).
/// Both bounds are inclusive at minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DayWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse `"HH:MM"` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, DomainError> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| DomainError::validation(format!("invalid window bound {s:?}: {e}")))
        };
        Ok(Self::new(parse(start)?, parse(end)?))
    }

    pub fn contains(&self, now: NaiveTime) -> bool {
        let now = truncate_to_minute(now);
        let (start, end) = (truncate_to_minute(self.start), truncate_to_minute(self.end));
        if start <= end {
            start <= now && now <= end
        } else {
            now >= start || now <= end
        }
    }
}

impl Default for DayWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}
