//! Time-bucketed visit series
//!
//! The store groups visits by `(created_at / step) * step`, which is a floor
//! to the unix-epoch grid. `Granularity::truncate` uses the same arithmetic so
//! sparse rows from the store line up exactly with the dense grid built here.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket width for a visit series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub const fn seconds(self) -> i64 {
        match self {
            Granularity::Hour => 3600,
            Granularity::Day => 86_400,
        }
    }

    pub fn duration(self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    /// Floor `ts` to the start of its bucket (UTC epoch grid)
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let offset = ts.timestamp().rem_euclid(self.seconds());
        ts - TimeDelta::seconds(offset) - TimeDelta::nanoseconds(ts.timestamp_subsec_nanos() as i64)
    }

    /// Floor a unix timestamp to the start of its bucket
    pub const fn truncate_unix(self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.seconds())
    }
}

/// Closed time interval `[since, until]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl Period {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// Window of `length` ending at `now`, both ends aligned to `granularity`
    pub fn trailing(now: DateTime<Utc>, length: TimeDelta, granularity: Granularity) -> Self {
        let until = granularity.truncate(now);
        let since = granularity.truncate(until - length);
        Self { since, until }
    }
}

/// Dashboard range selector for the click chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[default]
    Day,
    Week,
    Month,
}

impl TimeRange {
    pub fn granularity(self) -> Granularity {
        match self {
            TimeRange::Day => Granularity::Hour,
            TimeRange::Week | TimeRange::Month => Granularity::Day,
        }
    }

    pub fn length(self) -> TimeDelta {
        match self {
            TimeRange::Day => TimeDelta::days(1),
            TimeRange::Week => TimeDelta::days(7),
            TimeRange::Month => TimeDelta::days(30),
        }
    }

    pub fn period(self, now: DateTime<Utc>) -> Period {
        Period::trailing(now, self.length(), self.granularity())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub count: i64,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, count: i64) -> Self {
        Self { timestamp, count }
    }
}

/// Turn a sparse series into one point per bucket over `period`.
///
/// Buckets run from `truncate(since)` to `truncate(until)` inclusive. Buckets
/// absent from `points` get a count of 0, points that fall outside the period
/// are dropped, and points sharing a bucket are summed. The output is
/// ascending and feeding it back in returns it unchanged.
pub fn fill_gaps(
    points: &[TimeSeriesPoint],
    period: &Period,
    granularity: Granularity,
) -> Vec<TimeSeriesPoint> {
    let start = granularity.truncate(period.since);
    let end = granularity.truncate(period.until);
    if start > end {
        return Vec::new();
    }

    let mut counts: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
    for point in points {
        let bucket = granularity.truncate(point.timestamp);
        if bucket >= start && bucket <= end {
            *counts.entry(bucket).or_default() += point.count;
        }
    }

    let step = granularity.duration();
    let buckets = (end - start).num_seconds() / granularity.seconds() + 1;
    let mut series = Vec::with_capacity(buckets as usize);

    let mut current = start;
    while current <= end {
        let count = counts.get(&current).copied().unwrap_or(0);
        series.push(TimeSeriesPoint::new(current, count));
        current += step;
    }

    series
}
