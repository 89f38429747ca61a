//! Job schedules.
//!
//! All schedules are evaluated in UTC. `next_after` is a pure function of the
//! schedule and the reference time, so a restart never changes when a job
//! fires next.

use std::fmt;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{AutopressError, Result};

/// Upper bound on the occurrences listed for one look-ahead window.
const MAX_OCCURRENCES: usize = 1_000;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Every `every_secs` seconds, aligned to the Unix epoch.
    Interval { every_secs: u64 },
    /// Every day at `hour:minute`.
    Daily { hour: u32, minute: u32 },
    /// Every week on `weekday` at `hour:minute`.
    Weekly {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
    /// The first `weekday` of every month at `hour:minute`.
    MonthlyFirst {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
    /// A single run at a fixed instant.
    Once { at: DateTime<Utc> },
}

impl Schedule {
    /// Reject out-of-range fields.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Interval { every_secs } => {
                if *every_secs == 0 {
                    return Err(AutopressError::validation(
                        "interval schedule needs every_secs > 0",
                    ));
                }
                if i64::try_from(*every_secs).is_err() {
                    return Err(AutopressError::validation("interval every_secs is too large"));
                }
                Ok(())
            }
            Self::Daily { hour, minute }
            | Self::Weekly { hour, minute, .. }
            | Self::MonthlyFirst { hour, minute, .. } => check_time_of_day(*hour, *minute),
            Self::Once { .. } => Ok(()),
        }
    }

    /// The first fire time strictly after `after`, or `None` when the schedule
    /// has no further occurrences (an elapsed one-shot, or invalid fields).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every_secs } => {
                let every = i64::try_from(*every_secs).ok().filter(|e| *e > 0)?;
                let next = (after.timestamp().div_euclid(every) + 1).checked_mul(every)?;
                DateTime::from_timestamp(next, 0)
            }
            Self::Daily { hour, minute } => {
                let today = after.date_naive();
                (0..=1)
                    .filter_map(|offset| today.checked_add_days(Days::new(offset)))
                    .filter_map(|day| at_time(day, *hour, *minute))
                    .find(|candidate| *candidate > after)
            }
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let today = after.date_naive();
                (0..=7)
                    .filter_map(|offset| today.checked_add_days(Days::new(offset)))
                    .filter(|day| day.weekday() == *weekday)
                    .filter_map(|day| at_time(day, *hour, *minute))
                    .find(|candidate| *candidate > after)
            }
            Self::MonthlyFirst {
                weekday,
                hour,
                minute,
            } => {
                let month_start = after.date_naive().with_day(1)?;
                (0..=2)
                    .filter_map(|offset| month_start.checked_add_months(Months::new(offset)))
                    .filter_map(|first| {
                        NaiveDate::from_weekday_of_month_opt(first.year(), first.month(), *weekday, 1)
                    })
                    .filter_map(|day| at_time(day, *hour, *minute))
                    .find(|candidate| *candidate > after)
            }
            Self::Once { at } => (*at > after).then_some(*at),
        }
    }

    /// All fire times in `(from, until]`, ascending.
    pub fn occurrences(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let mut cursor = from;
        while let Some(next) = self.next_after(cursor) {
            if next > until || out.len() >= MAX_OCCURRENCES {
                break;
            }
            out.push(next);
            cursor = next;
        }
        out
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { every_secs } => write!(f, "every {every_secs}s"),
            Self::Daily { hour, minute } => write!(f, "daily {hour:02}:{minute:02}"),
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => write!(f, "weekly {weekday} {hour:02}:{minute:02}"),
            Self::MonthlyFirst {
                weekday,
                hour,
                minute,
            } => write!(f, "monthly first {weekday} {hour:02}:{minute:02}"),
            Self::Once { at } => write!(f, "once {}", at.to_rfc3339()),
        }
    }
}

fn check_time_of_day(hour: u32, minute: u32) -> Result<()> {
    if hour > 23 || minute > 59 {
        return Err(AutopressError::validation(format!(
            "invalid time of day {hour:02}:{minute:02}"
        )));
    }
    Ok(())
}

fn at_time(day: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    day.and_hms_opt(hour, minute, 0).map(|dt| dt.and_utc())
}

/// `at - window`, clamped to the earliest representable instant.
pub fn saturating_before(at: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    at.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `at + window`, clamped to the latest representable instant.
pub fn saturating_after(at: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
