//! Per-link statistics
//!
//! The sub-queries are independent, so they run concurrently under a single
//! `try_join!`. The first hard error drops the futures still in flight and
//! fails the whole report. "No rows" from any query is an empty result.

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::analytics::models::{
    BrowserShare, ChartEntry, DeviceKind, DeviceShare, DeviceSplit, LocationShare, OwnerOverview,
    ReferrerShare, StatisticsReport, DIRECT_REFERRER,
};
use crate::analytics::timeseries::{fill_gaps, Granularity, Period, TimeSeriesPoint};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Link, ShortLink};
use crate::storage::{
    BrowserCount, DeviceCount, LinkStore, LocationCount, ReferrerCount, StorageError,
    StorageResult,
};

pub struct StatisticsAggregator {
    storage: Arc<dyn LinkStore>,
    short_domain: String,
}

/// Treat "no rows" as an empty value; tag anything else with the query name
fn empty_if_missing<T: Default>(query: &'static str, result: StorageResult<T>) -> ServiceResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(StorageError::NotFound) => Ok(T::default()),
        Err(source) => Err(ServiceError::Aggregation { query, source }),
    }
}

impl StatisticsAggregator {
    pub fn new(storage: Arc<dyn LinkStore>, short_domain: impl Into<String>) -> Self {
        Self {
            storage,
            short_domain: short_domain.into(),
        }
    }

    /// Resolve `slug` for `owner_id` and build its report.
    /// A link owned by someone else is reported as not found.
    pub async fn get_stats(&self, owner_id: i64, slug: &str) -> ServiceResult<StatisticsReport> {
        let link = self.storage.get_authoritative(slug).await?;
        if link.owner_id != owner_id {
            return Err(ServiceError::NotFound);
        }

        let parts = self.collect(owner_id, &link).await?;
        let short_url = link.short_url(&self.short_domain);
        Ok(parts.into_report(link, short_url))
    }

    /// Every link of `owner_id` with its visit count, plus this month's
    /// link and visit counts
    pub async fn owner_overview(&self, owner_id: i64) -> ServiceResult<OwnerOverview> {
        let storage = self.storage.as_ref();
        let since = month_start(Utc::now());

        let (links, links_this_month, visits_this_month) = tokio::try_join!(
            async { empty_if_missing("links", storage.list(owner_id, None).await) },
            async {
                empty_if_missing(
                    "monthly links",
                    storage.count_links_since(owner_id, since).await,
                )
            },
            async {
                empty_if_missing(
                    "monthly visits",
                    storage.count_visits_since(owner_id, since).await,
                )
            },
        )?;

        let mut links: Vec<ShortLink> = links
            .into_iter()
            .map(|link| ShortLink {
                short_url: link.short_url(&self.short_domain),
                link,
            })
            .collect();
        // The store lists newest first; a stable sort keeps that among ties
        links.sort_by(|a, b| b.link.visit_count.cmp(&a.link.visit_count));

        Ok(OwnerOverview {
            total_visits: links.iter().map(|l| l.link.visit_count).sum(),
            links,
            links_this_month,
            visits_this_month,
        })
    }

    async fn collect(&self, owner_id: i64, link: &Link) -> ServiceResult<StatsParts> {
        let storage = self.storage.as_ref();
        let link_id = link.id;
        let period = Period::trailing(Utc::now(), TimeDelta::hours(24), Granularity::Hour);

        let (locations, browsers, devices, referrers, total_visits, unique_visitors, series) =
            tokio::try_join!(
                async {
                    empty_if_missing(
                        "location distribution",
                        storage.location_distribution(owner_id, link_id).await,
                    )
                },
                async {
                    empty_if_missing(
                        "browser distribution",
                        storage.browser_distribution(owner_id, link_id).await,
                    )
                },
                async {
                    empty_if_missing(
                        "device distribution",
                        storage.device_distribution(owner_id, link_id).await,
                    )
                },
                async {
                    empty_if_missing(
                        "referrer distribution",
                        storage.referrer_distribution(owner_id, link_id).await,
                    )
                },
                async { empty_if_missing("total visits", storage.total_visits(link_id).await) },
                async { empty_if_missing("unique visitors", storage.unique_visitors(link_id).await) },
                async {
                    empty_if_missing(
                        "visits over time",
                        storage
                            .visits_over_time(link_id, &period, Granularity::Hour)
                            .await,
                    )
                },
            )?;

        debug!(link_id, total_visits, unique_visitors, "statistics collected");

        Ok(StatsParts {
            locations,
            browsers,
            devices,
            referrers,
            total_visits,
            unique_visitors,
            visits_over_time: fill_gaps(&series, &period, Granularity::Hour),
        })
    }
}

/// Unix time of midnight UTC on the first day of `now`'s month
fn month_start(now: DateTime<Utc>) -> i64 {
    now.date_naive()
        .with_day(1)
        .and_then(|first| first.and_hms_opt(0, 0, 0))
        .map(|start| start.and_utc().timestamp())
        .unwrap_or_else(|| now.timestamp())
}

/// Raw query results, gathered before any derived field is computed
#[derive(Debug, Default)]
struct StatsParts {
    locations: Vec<LocationCount>,
    browsers: Vec<BrowserCount>,
    devices: Vec<DeviceCount>,
    referrers: Vec<ReferrerCount>,
    total_visits: i64,
    unique_visitors: i64,
    visits_over_time: Vec<TimeSeriesPoint>,
}

fn percentage(part: i64, total: i64) -> f32 {
    if total <= 0 {
        0.0
    } else {
        part as f32 / total as f32 * 100.0
    }
}

impl StatsParts {
    fn into_report(self, link: Link, short_url: String) -> StatisticsReport {
        StatisticsReport {
            devices: device_split(&self.devices),
            browser_names: browser_names(&self.browsers),
            locations: location_shares(self.locations),
            browsers: browser_shares(self.browsers),
            referrers: referrer_shares(self.referrers),
            total_visits: self.total_visits,
            unique_visitors: self.unique_visitors,
            visits_over_time: self.visits_over_time,
            link,
            short_url,
        }
    }
}

fn location_shares(rows: Vec<LocationCount>) -> Vec<LocationShare> {
    let total: i64 = rows.iter().map(|r| r.visits).sum();
    rows.into_iter()
        .map(|r| LocationShare {
            percentage: percentage(r.visits, total),
            country_code: r.country_code.filter(|c| !c.is_empty()),
            country: r.country_name,
            visits: r.visits,
        })
        .collect()
}

fn device_split(rows: &[DeviceCount]) -> DeviceSplit {
    let mobile: i64 = rows.iter().filter(|r| r.mobile).map(|r| r.visits).sum();
    let desktop: i64 = rows.iter().filter(|r| !r.mobile).map(|r| r.visits).sum();
    let total = mobile + desktop;

    DeviceSplit {
        mobile: DeviceShare {
            kind: DeviceKind::Mobile,
            visits: mobile,
            percentage: percentage(mobile, total),
        },
        desktop: DeviceShare {
            kind: DeviceKind::Desktop,
            visits: desktop,
            percentage: percentage(desktop, total),
        },
    }
}

fn browser_shares(rows: Vec<BrowserCount>) -> Vec<BrowserShare> {
    let total: i64 = rows.iter().map(|r| r.visits).sum();
    rows.into_iter()
        .map(|r| BrowserShare {
            percentage: percentage(r.visits, total),
            browser: r.browser,
            visits: r.visits,
        })
        .collect()
}

fn browser_names(rows: &[BrowserCount]) -> Vec<ChartEntry> {
    let mut by_name: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        *by_name.entry(row.browser.name.as_str()).or_default() += row.visits;
    }

    let mut entries: Vec<ChartEntry> = by_name
        .into_iter()
        .map(|(name, visits)| ChartEntry {
            label: if name.is_empty() { "Other" } else { name }.to_string(),
            value: visits,
        })
        .collect();
    entries.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    entries
}

fn referrer_shares(rows: Vec<ReferrerCount>) -> Vec<ReferrerShare> {
    let total: i64 = rows.iter().map(|r| r.visits).sum();
    rows.into_iter()
        .map(|r| ReferrerShare {
            percentage: percentage(r.visits, total),
            source: if r.source.is_empty() {
                DIRECT_REFERRER.to_string()
            } else {
                r.source
            },
            visits: r.visits,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BrowserFact;

    fn browser(name: &str, version: &str, mobile: bool, visits: i64) -> BrowserCount {
        BrowserCount {
            browser: BrowserFact {
                name: name.to_string(),
                version: version.to_string(),
                platform: String::new(),
                is_mobile: mobile,
            },
            visits,
        }
    }

    #[test]
    fn test_percentage_of_zero_total() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }

    #[test]
    fn test_device_split_weights_by_visits() {
        let split = device_split(&[
            DeviceCount { mobile: true, visits: 3 },
            DeviceCount { mobile: false, visits: 1 },
        ]);
        assert_eq!(split.mobile.visits, 3);
        assert_eq!(split.mobile.percentage, 75.0);
        assert_eq!(split.desktop.percentage, 25.0);
    }

    #[test]
    fn test_device_split_empty() {
        let split = device_split(&[]);
        assert_eq!(split.mobile.percentage, 0.0);
        assert_eq!(split.desktop.percentage, 0.0);
    }

    #[test]
    fn test_browser_names_merge_versions() {
        let names = browser_names(&[
            browser("Chrome", "120", false, 2),
            browser("Firefox", "121", false, 5),
            browser("Chrome", "119", true, 4),
            browser("", "", false, 1),
        ]);

        assert_eq!(
            names,
            vec![
                ChartEntry { label: "Chrome".into(), value: 6 },
                ChartEntry { label: "Firefox".into(), value: 5 },
                ChartEntry { label: "Other".into(), value: 1 },
            ]
        );
    }

    #[test]
    fn test_referrer_shares_label_direct() {
        let shares = referrer_shares(vec![
            ReferrerCount { source: String::new(), visits: 1 },
            ReferrerCount { source: "https://news.ycombinator.com/".into(), visits: 3 },
        ]);
        assert_eq!(shares[0].source, DIRECT_REFERRER);
        assert_eq!(shares[0].percentage, 25.0);
        assert_eq!(shares[1].percentage, 75.0);
    }

    #[test]
    fn test_location_shares_sum_to_hundred() {
        let shares = location_shares(vec![
            LocationCount { country_code: Some("FR".into()), country_name: "France".into(), visits: 1 },
            LocationCount { country_code: None, country_name: "Unknown".into(), visits: 1 },
        ]);
        let sum: f32 = shares.iter().map(|s| s.percentage).sum();
        assert!((sum - 100.0).abs() < 0.01);
        assert_eq!(shares[1].country_code, None);
    }

    #[test]
    fn test_month_start() {
        let now = DateTime::parse_from_rfc3339("2024-03-17T15:42:10Z")
            .unwrap()
            .with_timezone(&Utc);
        let start = DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z").unwrap();
        assert_eq!(month_start(now), start.timestamp());
    }

    #[test]
    fn test_empty_if_missing() {
        let empty: Vec<ReferrerCount> =
            empty_if_missing("referrers", Err(StorageError::NotFound)).unwrap();
        assert!(empty.is_empty());

        let err = empty_if_missing::<i64>("total visits", Err(StorageError::Conflict)).unwrap_err();
        assert!(matches!(err, ServiceError::Aggregation { query: "total visits", .. }));
    }
}
