use crate::analytics::timeseries::{Granularity, Period, TimeSeriesPoint};
use crate::models::{BrowserFact, IpLocation, Link, NewVisit, Visit};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no matching rows")]
    NotFound,
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => StorageError::Conflict,
            other => StorageError::Other(other.into()),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Visits grouped by country
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct LocationCount {
    pub country_code: Option<String>,
    pub country_name: String,
    pub visits: i64,
}

/// Visits grouped by deduplicated browser facts
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BrowserCount {
    #[sqlx(flatten)]
    pub browser: BrowserFact,
    pub visits: i64,
}

/// Visits grouped by device kind
#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct DeviceCount {
    pub mobile: bool,
    pub visits: i64,
}

/// Visits grouped by referer; an empty source means no referer was sent
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ReferrerCount {
    pub source: String,
    pub visits: i64,
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Initialize the storage (run migrations, etc.)
    async fn init(&self) -> Result<()>;

    /// Insert a link under a caller-provided slug.
    /// Returns `StorageError::Conflict` when the slug is taken.
    async fn add(
        &self,
        title: &str,
        slug: &str,
        destination: &str,
        owner_id: i64,
    ) -> StorageResult<Link>;

    /// Look up a link by slug
    async fn get(&self, slug: &str) -> StorageResult<Link>;

    /// Look up a link by slug, skipping any read cache in front of the store.
    /// Owner-facing reads go through here so `visit_count` is current.
    async fn get_authoritative(&self, slug: &str) -> StorageResult<Link> {
        self.get(slug).await
    }

    async fn get_by_id(&self, id: i64) -> StorageResult<Link>;

    /// Links of `owner_id`, newest first. A non-empty `search` keeps links
    /// whose title, destination or slug contains it, ignoring case.
    async fn list(&self, owner_id: i64, search: Option<&str>) -> StorageResult<Vec<Link>>;

    /// Delete a link together with its visits and their locations.
    /// Returns `StorageError::NotFound` unless `owner_id` owns the link.
    async fn delete(&self, slug: &str, owner_id: i64) -> StorageResult<()>;

    /// Toggle the active flag of a link
    async fn set_active(&self, slug: &str, active: bool) -> StorageResult<()>;

    /// Insert a visit and bump the link's denormalized counter
    async fn track_visit(&self, visit: &NewVisit) -> StorageResult<Visit>;

    /// Insert the browser facts or return the id of the identical row
    async fn upsert_browser(&self, browser: &BrowserFact) -> StorageResult<i64>;

    async fn insert_visit_location(&self, visit_id: i64, location: &IpLocation)
        -> StorageResult<()>;

    async fn visit_location(&self, visit_id: i64) -> StorageResult<Option<IpLocation>>;

    /// All visits of a link, oldest first
    async fn visits_for_link(&self, link_id: i64) -> StorageResult<Vec<Visit>>;

    async fn location_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<LocationCount>>;

    async fn browser_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<BrowserCount>>;

    async fn device_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<DeviceCount>>;

    async fn referrer_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<ReferrerCount>>;

    async fn total_visits(&self, link_id: i64) -> StorageResult<i64>;

    /// Links `owner_id` created at or after the unix time `since`
    async fn count_links_since(&self, owner_id: i64, since: i64) -> StorageResult<i64>;

    /// Visits to links of `owner_id` at or after the unix time `since`
    async fn count_visits_since(&self, owner_id: i64, since: i64) -> StorageResult<i64>;

    /// Number of distinct client addresses
    async fn unique_visitors(&self, link_id: i64) -> StorageResult<i64>;

    /// Sparse visit counts per bucket, bucket-aligned and ascending.
    /// Empty buckets are not returned.
    async fn visits_over_time(
        &self,
        link_id: i64,
        period: &Period,
        granularity: Granularity,
    ) -> StorageResult<Vec<TimeSeriesPoint>>;
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Lower-cased `LIKE` pattern matching `search` anywhere, with `\` as the
/// escape character. `None` when there is nothing to search for.
pub(crate) fn search_pattern(search: Option<&str>) -> Option<String> {
    let search = search.map(str::trim).filter(|s| !s.is_empty())?;
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

/// Convert sparse `(bucket, count)` rows into series points
pub(crate) fn to_points(rows: Vec<(i64, i64)>) -> Vec<TimeSeriesPoint> {
    rows.into_iter()
        .filter_map(|(bucket, count)| {
            chrono::DateTime::from_timestamp(bucket, 0).map(|ts| TimeSeriesPoint::new(ts, count))
        })
        .collect()
}

/// Half-open unix range `[start, end)` covering every bucket of `period`
pub(crate) fn bucket_range(period: &Period, granularity: Granularity) -> (i64, i64) {
    let start = granularity.truncate_unix(period.since.timestamp());
    let end = granularity.truncate_unix(period.until.timestamp()) + granularity.seconds();
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern() {
        assert_eq!(search_pattern(None), None);
        assert_eq!(search_pattern(Some("  ")), None);
        assert_eq!(search_pattern(Some("Docs")).as_deref(), Some("%docs%"));
        assert_eq!(search_pattern(Some("50%_off")).as_deref(), Some("%50\\%\\_off%"));
    }
}
