//! Calendar handling for the ledger
//!
//! Payments and bills are stored with UTC timestamps, but the clinic reports
//! by its local calendar day. This module converts between the two:
//! - `ClinicTimezone`: the clinic's IANA timezone
//! - `DayWindow`: the half-open UTC interval `[start, end)` of one local day
//! - `DateRange`: an inclusive range of local dates

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

/// Timezone wrapper for the clinic's reporting calendar
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicTimezone(pub Tz);

impl Serialize for ClinicTimezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for ClinicTimezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for ClinicTimezone {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tz::from_str(s)
            .map(ClinicTimezone)
            .map_err(|_| TemporalError::InvalidTimezone(s.to_string()))
    }
}

impl ClinicTimezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Returns the IANA name of the timezone
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Returns the local calendar date of a UTC instant
    pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        utc.with_timezone(&self.0).date_naive()
    }

    /// Gets the first instant of `date` in this timezone, as UTC
    ///
    /// When local midnight falls in a DST gap the first valid instant after
    /// it is used.
    pub fn start_of_day(&self, date: NaiveDate) -> Result<DateTime<Utc>, TemporalError> {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| TemporalError::InvalidDate(date.to_string()))?;

        let mut candidate = midnight;
        for _ in 0..4 {
            match self.0.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => return Ok(dt.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => return Ok(earliest.with_timezone(&Utc)),
                LocalResult::None => candidate += Duration::minutes(30),
            }
        }

        Err(TemporalError::InvalidDate(date.to_string()))
    }

    /// Returns the `[start, end)` window of `date`
    pub fn day_window(&self, date: NaiveDate) -> Result<DayWindow, TemporalError> {
        let next = date
            .succ_opt()
            .ok_or_else(|| TemporalError::InvalidDate(date.to_string()))?;

        Ok(DayWindow {
            date,
            start: self.start_of_day(date)?,
            end: self.start_of_day(next)?,
        })
    }
}

impl Default for ClinicTimezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must be before end {end}")]
    InvalidPeriod {
        start: String,
        end: String,
    },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Date cannot be represented: {0}")]
    InvalidDate(String),
}

/// The UTC interval covering one local calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    /// The local calendar date
    pub date: NaiveDate,
    /// First instant of the day (inclusive)
    pub start: DateTime<Utc>,
    /// First instant of the next day (exclusive)
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// Returns true if `instant` falls inside the window
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// An inclusive range of calendar dates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        if start > end {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of days in the range, counting both ends
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Iterates over every date in the range
    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start
            .iter_days()
            .take_while(move |d| *d <= self.end)
    }
}
