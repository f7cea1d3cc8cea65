//! Fixed durations written as `7d`, `365d`, `30min`, `1h30m` or `2 weeks`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::TimeDelta;
use regex::Regex;
use serde::Deserialize;

use crate::error::{ForecastError, Result};

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SECOND: i64 = 1_000_000_000;
const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;
const NANOS_PER_WEEK: i64 = 7 * NANOS_PER_DAY;

static COMPONENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*([A-Za-z]+)").unwrap());

/// A fixed span of time with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Interval {
    nanos: i64,
}

impl Interval {
    pub const fn from_nanos(nanos: i64) -> Self {
        Interval { nanos }
    }

    pub const fn seconds(seconds: i64) -> Self {
        Interval::from_nanos(seconds * NANOS_PER_SECOND)
    }

    pub const fn hours(hours: i64) -> Self {
        Interval::from_nanos(hours * NANOS_PER_HOUR)
    }

    pub const fn days(days: i64) -> Self {
        Interval::from_nanos(days * NANOS_PER_DAY)
    }

    pub const fn nanos(&self) -> i64 {
        self.nanos
    }

    pub fn is_positive(&self) -> bool {
        self.nanos > 0
    }

    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    pub fn as_time_delta(&self) -> TimeDelta {
        TimeDelta::nanoseconds(self.nanos)
    }
}

fn unit_nanos(unit: &str) -> Option<i64> {
    let nanos = match unit.to_ascii_lowercase().as_str() {
        "ns" | "nanosecond" | "nanoseconds" => 1,
        "us" | "microsecond" | "microseconds" => NANOS_PER_MICRO,
        "ms" | "millisecond" | "milliseconds" => NANOS_PER_MILLI,
        "s" | "sec" | "secs" | "second" | "seconds" => NANOS_PER_SECOND,
        "m" | "t" | "min" | "mins" | "minute" | "minutes" => NANOS_PER_MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => NANOS_PER_HOUR,
        "d" | "day" | "days" => NANOS_PER_DAY,
        "w" | "week" | "weeks" => NANOS_PER_WEEK,
        _ => return None,
    };
    Some(nanos)
}

impl FromStr for Interval {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ForecastError::InvalidInterval(s.to_string());
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };
        if body.is_empty() {
            return Err(invalid());
        }

        let mut total: i64 = 0;
        let mut consumed = 0;
        for caps in COMPONENT_REGEX.captures_iter(body) {
            let (Some(whole), Some(value), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                return Err(invalid());
            };
            // only whitespace may separate components
            if !body[consumed..whole.start()].trim().is_empty() {
                return Err(invalid());
            }
            consumed = whole.end();

            let value: i64 = value.as_str().parse().map_err(|_| invalid())?;
            let per_unit = unit_nanos(unit.as_str()).ok_or_else(invalid)?;
            total = value
                .checked_mul(per_unit)
                .and_then(|nanos| total.checked_add(nanos))
                .ok_or_else(invalid)?;
        }
        if consumed == 0 || !body[consumed..].trim().is_empty() {
            return Err(invalid());
        }

        Ok(Interval::from_nanos(if negative { -total } else { total }))
    }
}

impl TryFrom<String> for Interval {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl TryFrom<&str> for Interval {
    type Error = ForecastError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

impl TryFrom<TimeDelta> for Interval {
    type Error = ForecastError;

    fn try_from(value: TimeDelta) -> Result<Self> {
        value
            .num_nanoseconds()
            .map(Interval::from_nanos)
            .ok_or_else(|| ForecastError::InvalidInterval(value.to_string()))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_time_delta())
    }
}
