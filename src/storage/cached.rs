use crate::analytics::timeseries::{Granularity, Period, TimeSeriesPoint};
use crate::models::{BrowserFact, IpLocation, Link, NewVisit, Visit};
use crate::storage::{
    BrowserCount, DeviceCount, LinkStore, LocationCount, ReferrerCount, StorageResult,
};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Read-through cache in front of slug lookups.
///
/// Only `get` is cached, and only hits: a slug that does not exist yet must
/// resolve as soon as it is inserted. Visits are not propagated to cached
/// entries, so a cached `visit_count` lags behind the store. Readers that
/// need the current count use `get_authoritative`. Every other call goes
/// straight to the inner store.
pub struct CachedStorage {
    inner: Arc<dyn LinkStore>,
    read_cache: Cache<String, Link>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn LinkStore>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { inner, read_cache }
    }

    /// Invalidate cache entry for a specific slug
    async fn invalidate_cache(&self, slug: &str) {
        self.read_cache.invalidate(slug).await;
    }
}

#[async_trait]
impl LinkStore for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn add(
        &self,
        title: &str,
        slug: &str,
        destination: &str,
        owner_id: i64,
    ) -> StorageResult<Link> {
        let link = self.inner.add(title, slug, destination, owner_id).await?;
        self.read_cache.insert(link.slug.clone(), link.clone()).await;
        Ok(link)
    }

    async fn get(&self, slug: &str) -> StorageResult<Link> {
        if let Some(link) = self.read_cache.get(slug).await {
            return Ok(link);
        }

        let link = self.inner.get(slug).await?;
        self.read_cache.insert(slug.to_string(), link.clone()).await;
        Ok(link)
    }

    async fn get_authoritative(&self, slug: &str) -> StorageResult<Link> {
        let link = self.inner.get_authoritative(slug).await?;

        // Keep cache in sync with the latest database read
        self.read_cache.insert(slug.to_string(), link.clone()).await;
        Ok(link)
    }

    async fn get_by_id(&self, id: i64) -> StorageResult<Link> {
        self.inner.get_by_id(id).await
    }

    async fn list(&self, owner_id: i64, search: Option<&str>) -> StorageResult<Vec<Link>> {
        self.inner.list(owner_id, search).await
    }

    async fn delete(&self, slug: &str, owner_id: i64) -> StorageResult<()> {
        self.inner.delete(slug, owner_id).await?;
        self.invalidate_cache(slug).await;
        Ok(())
    }

    async fn set_active(&self, slug: &str, active: bool) -> StorageResult<()> {
        let result = self.inner.set_active(slug, active).await;
        self.invalidate_cache(slug).await;
        result
    }

    async fn track_visit(&self, visit: &NewVisit) -> StorageResult<Visit> {
        self.inner.track_visit(visit).await
    }

    async fn upsert_browser(&self, browser: &BrowserFact) -> StorageResult<i64> {
        self.inner.upsert_browser(browser).await
    }

    async fn insert_visit_location(
        &self,
        visit_id: i64,
        location: &IpLocation,
    ) -> StorageResult<()> {
        self.inner.insert_visit_location(visit_id, location).await
    }

    async fn visit_location(&self, visit_id: i64) -> StorageResult<Option<IpLocation>> {
        self.inner.visit_location(visit_id).await
    }

    async fn visits_for_link(&self, link_id: i64) -> StorageResult<Vec<Visit>> {
        self.inner.visits_for_link(link_id).await
    }

    async fn location_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<LocationCount>> {
        self.inner.location_distribution(owner_id, link_id).await
    }

    async fn browser_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<BrowserCount>> {
        self.inner.browser_distribution(owner_id, link_id).await
    }

    async fn device_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<DeviceCount>> {
        self.inner.device_distribution(owner_id, link_id).await
    }

    async fn referrer_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<ReferrerCount>> {
        self.inner.referrer_distribution(owner_id, link_id).await
    }

    async fn total_visits(&self, link_id: i64) -> StorageResult<i64> {
        self.inner.total_visits(link_id).await
    }

    async fn count_links_since(&self, owner_id: i64, since: i64) -> StorageResult<i64> {
        self.inner.count_links_since(owner_id, since).await
    }

    async fn count_visits_since(&self, owner_id: i64, since: i64) -> StorageResult<i64> {
        self.inner.count_visits_since(owner_id, since).await
    }

    async fn unique_visitors(&self, link_id: i64) -> StorageResult<i64> {
        self.inner.unique_visitors(link_id).await
    }

    async fn visits_over_time(
        &self,
        link_id: i64,
        period: &Period,
        granularity: Granularity,
    ) -> StorageResult<Vec<TimeSeriesPoint>> {
        self.inner
            .visits_over_time(link_id, period, granularity)
            .await
    }
}
