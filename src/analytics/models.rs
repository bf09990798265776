//! Data models for per-link statistics

use serde::Serialize;

use crate::analytics::timeseries::TimeSeriesPoint;
use crate::models::{BrowserFact, Link, ShortLink};

/// Label shown for visits that carried no referer
pub const DIRECT_REFERRER: &str = "Direct";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Mobile,
    Desktop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationShare {
    pub country_code: Option<String>,
    pub country: String,
    pub visits: i64,
    pub percentage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceShare {
    pub kind: DeviceKind,
    pub visits: i64,
    pub percentage: f32,
}

/// Mobile versus desktop split
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSplit {
    pub mobile: DeviceShare,
    pub desktop: DeviceShare,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserShare {
    #[serde(flatten)]
    pub browser: BrowserFact,
    pub visits: i64,
    pub percentage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerShare {
    pub source: String,
    pub visits: i64,
    pub percentage: f32,
}

/// Generic label/value pair for charts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartEntry {
    pub label: String,
    pub value: i64,
}

/// Everything the dashboard shows for a single link
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsReport {
    pub link: Link,
    pub short_url: String,
    pub total_visits: i64,
    pub unique_visitors: i64,
    pub locations: Vec<LocationShare>,
    pub devices: DeviceSplit,
    pub browsers: Vec<BrowserShare>,
    /// Visits per browser name across versions and platforms
    pub browser_names: Vec<ChartEntry>,
    pub referrers: Vec<ReferrerShare>,
    /// Hourly visits over the trailing 24 hours
    pub visits_over_time: Vec<TimeSeriesPoint>,
}

/// Summary across all links of one owner
#[derive(Debug, Clone, Serialize)]
pub struct OwnerOverview {
    /// Most visited first
    pub links: Vec<ShortLink>,
    pub total_visits: i64,
    /// Counted from the start of the current UTC month
    pub links_this_month: i64,
    pub visits_this_month: i64,
}
