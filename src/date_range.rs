//! Calendar date ranges used for gap computation
//!
//! A [`DateRange`] is a closed interval of UTC calendar days: both `from`
//! and `to` are part of the range. Subtraction, containment and storage
//! boundary comparisons all use the same day-granular, inclusive rules, so a
//! range never produces a zero-length gap.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised when building a range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid date range: {from} is after {to}")]
    Inverted { from: NaiveDate, to: NaiveDate },

    #[error("invalid date range: one side is unbounded")]
    Unbounded,
}

/// Closed interval `[from, to]` of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr", into = "RangeRepr")]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Serialize, Deserialize)]
struct RangeRepr {
    from: NaiveDate,
    to: NaiveDate,
}

impl TryFrom<RangeRepr> for DateRange {
    type Error = RangeError;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        DateRange::new(repr.from, repr.to)
    }
}

impl From<DateRange> for RangeRepr {
    fn from(range: DateRange) -> Self {
        Self {
            from: range.from,
            to: range.to,
        }
    }
}

impl DateRange {
    /// Create a range, rejecting `from > to`.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, RangeError> {
        if from > to {
            return Err(RangeError::Inverted { from, to });
        }
        Ok(Self { from, to })
    }

    /// Range covering a single day.
    pub fn day(date: NaiveDate) -> Self {
        Self { from: date, to: date }
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    /// Number of days in the range (at least 1).
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// True if the UTC day of `time` lies inside the range.
    pub fn contains_time(&self, time: DateTime<Utc>) -> bool {
        self.contains(time.date_naive())
    }

    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    pub fn intersects(&self, other: &DateRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// True if the ranges share no day but no day lies between them either.
    pub fn is_adjacent(&self, other: &DateRange) -> bool {
        self.to.checked_add_days(Days::new(1)) == Some(other.from)
            || other.to.checked_add_days(Days::new(1)) == Some(self.from)
    }

    /// Every day of `self` is before every day of `other`.
    pub fn is_before(&self, other: &DateRange) -> bool {
        self.to < other.from
    }

    /// Every day of `self` is after every day of `other`.
    pub fn is_after(&self, other: &DateRange) -> bool {
        self.from > other.to
    }

    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self {
            from: self.from.max(other.from),
            to: self.to.min(other.to),
        })
    }

    /// Smallest range containing both ranges and everything between them.
    pub fn hull(&self, other: &DateRange) -> DateRange {
        Self {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }

    /// Portions of `self` not covered by `other`, in chronological order.
    ///
    /// Returns `[self]` when the ranges do not intersect, an empty vector when
    /// `other` covers `self`, and two ranges when `other` lies strictly inside.
    pub fn subtract(&self, other: &DateRange) -> Vec<DateRange> {
        if !self.intersects(other) {
            return vec![*self];
        }

        let mut result = Vec::with_capacity(2);
        if self.from < other.from {
            if let Some(to) = other.from.pred_opt() {
                result.push(Self { from: self.from, to });
            }
        }
        if self.to > other.to {
            if let Some(from) = other.to.succ_opt() {
                result.push(Self { from, to: self.to });
            }
        }
        result
    }

    /// First instant of the range (midnight UTC of `from`).
    pub fn start_time(&self) -> DateTime<Utc> {
        self.from.and_time(NaiveTime::MIN).and_utc()
    }

    /// Exclusive end instant (midnight UTC of the day after `to`).
    pub fn end_time(&self) -> DateTime<Utc> {
        match self.to.succ_opt() {
            Some(next) => next.and_time(NaiveTime::MIN).and_utc(),
            None => DateTime::<Utc>::MAX_UTC,
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

/// Minimal range containing the days of two timestamps.
///
/// Both `None` means there is nothing stored yet (`Ok(None)`). Exactly one
/// `None` would describe a range with an open side, which is rejected.
pub fn date_range_between(
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
) -> Result<Option<DateRange>, RangeError> {
    match (earliest, latest) {
        (None, None) => Ok(None),
        (Some(a), Some(b)) => {
            let (a, b) = (a.date_naive(), b.date_naive());
            Ok(Some(DateRange {
                from: a.min(b),
                to: a.max(b),
            }))
        }
        _ => Err(RangeError::Unbounded),
    }
}
