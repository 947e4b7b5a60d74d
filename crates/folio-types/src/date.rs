use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// How much of a [`DateRange`] endpoint is meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Minute,
    Second,
}

impl DatePrecision {
    /// Integer code stored in the precision column.
    pub fn code(self) -> i64 {
        match self {
            Self::Year => 1,
            Self::Month => 2,
            Self::Day => 3,
            Self::Minute => 4,
            Self::Second => 5,
        }
    }

    /// Inverse of [`DatePrecision::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Year),
            2 => Some(Self::Month),
            3 => Some(Self::Day),
            4 => Some(Self::Minute),
            5 => Some(Self::Second),
            _ => None,
        }
    }
}

/// A possibly open-ended date range with a precision.
///
/// Single dates have `end == None`. Stored as three columns: Begin, End and
/// Precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub begin: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub precision: DatePrecision,
}

impl DateRange {
    /// A single calendar day.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            begin: date.and_time(NaiveTime::MIN),
            end: None,
            precision: DatePrecision::Day,
        }
    }

    /// A single instant with second precision.
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self {
            begin: at.naive_utc(),
            end: None,
            precision: DatePrecision::Second,
        }
    }

    /// The first instant covered by the range, in UTC.
    pub fn begin_utc(&self) -> DateTime<Utc> {
        self.begin.and_utc()
    }

    /// Returns `true` if the range has a distinct end.
    pub fn is_range(&self) -> bool {
        self.end.is_some_and(|end| end != self.begin)
    }

    fn format_point(&self, at: &NaiveDateTime) -> String {
        match self.precision {
            DatePrecision::Year => format!("{:04}", at.year()),
            DatePrecision::Month => at.format("%Y-%m").to_string(),
            DatePrecision::Day => at.format("%Y-%m-%d").to_string(),
            DatePrecision::Minute => at.format("%Y-%m-%d %H:%M").to_string(),
            DatePrecision::Second => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_point(&self.begin))?;
        if let Some(end) = self.end.filter(|end| *end != self.begin) {
            write!(f, " - {}", self.format_point(&end))?;
        }
        Ok(())
    }
}

/// Parse one endpoint, returning the instant and the precision it was
/// written with.
fn parse_point(s: &str) -> Option<(NaiveDateTime, DatePrecision)> {
    let s = s.trim();
    if let Ok(at) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some((at, DatePrecision::Second));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        return Some((at, DatePrecision::Minute));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some((d.and_time(NaiveTime::MIN), DatePrecision::Day));
    }
    if let Some((y, m)) = s.split_once('-') {
        let year: i32 = y.parse().ok()?;
        let month: u32 = m.parse().ok()?;
        let d = NaiveDate::from_ymd_opt(year, month, 1)?;
        return Some((d.and_time(NaiveTime::MIN), DatePrecision::Month));
    }
    if s.len() == 4 {
        let year: i32 = s.parse().ok()?;
        let d = NaiveDate::from_ymd_opt(year, 1, 1)?;
        return Some((d.and_time(NaiveTime::MIN), DatePrecision::Year));
    }
    None
}

impl FromStr for DateRange {
    type Err = TypeError;

    /// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]`, and
    /// ranges of those joined by `" - "` or `" to "`. The coarser of the two
    /// endpoint precisions wins.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (left, right) = match s.split_once(" - ").or_else(|| s.split_once(" to ")) {
            Some((l, r)) => (l, Some(r)),
            None => (s, None),
        };
        let (begin, p1) = parse_point(left).ok_or_else(|| TypeError::parse("date", s))?;
        let (end, precision) = match right {
            Some(r) => {
                let (end, p2) = parse_point(r).ok_or_else(|| TypeError::parse("date", s))?;
                (Some(end), p1.min(p2))
            }
            None => (None, p1),
        };
        if end.is_some_and(|end| end < begin) {
            return Err(TypeError::parse("date range", s));
        }
        Ok(Self {
            begin,
            end,
            precision,
        })
    }
}

/// Parse a timestamp written as RFC 3339 or `YYYY-MM-DD[ HH:MM[:SS]]` (UTC).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TypeError> {
    let s = s.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    match parse_point(s) {
        Some((at, p)) if p >= DatePrecision::Day => Ok(at.and_utc()),
        _ => Err(TypeError::parse("timestamp", s)),
    }
}
