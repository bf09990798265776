//! Link operations shared by the HTTP routers and the admin CLI

use axum::http::Uri;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::timeseries::{fill_gaps, Granularity, Period, TimeRange, TimeSeriesPoint};
use crate::analytics::{OwnerOverview, StatisticsAggregator, StatisticsReport, VisitRecorder};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Link, RequestInfo, ShortLink};
use crate::shortcode::{is_url_safe, SlugGenerator};
use crate::storage::{LinkStore, StorageError};
use crate::title::TitleExtractor;

/// Attempts at finding a free slug before giving up
pub const MAX_SLUG_ATTEMPTS: usize = 5;

pub struct LinkService {
    storage: Arc<dyn LinkStore>,
    slugs: SlugGenerator,
    short_domain: String,
    recorder: Arc<VisitRecorder>,
    stats: StatisticsAggregator,
    titles: Option<Arc<dyn TitleExtractor>>,
}

impl LinkService {
    pub fn new(
        storage: Arc<dyn LinkStore>,
        recorder: Arc<VisitRecorder>,
        slugs: SlugGenerator,
        short_domain: impl Into<String>,
    ) -> Self {
        let short_domain = short_domain.into();
        Self {
            stats: StatisticsAggregator::new(Arc::clone(&storage), short_domain.clone()),
            storage,
            slugs,
            short_domain,
            recorder,
            titles: None,
        }
    }

    /// Look up the page title of destinations created without one
    pub fn with_title_extractor(mut self, titles: Arc<dyn TitleExtractor>) -> Self {
        self.titles = Some(titles);
        self
    }

    pub fn short_domain(&self) -> &str {
        &self.short_domain
    }

    /// Create a link for `owner_id` under a fresh random slug.
    ///
    /// Without a title, the destination page's title is used, or its host if
    /// the page has none. A slug collision is retried with a new slug, at most
    /// `MAX_SLUG_ATTEMPTS` times. A failing random source is not retried.
    pub async fn shorten(
        &self,
        owner_id: i64,
        destination: &str,
        title: Option<&str>,
    ) -> ServiceResult<ShortLink> {
        let destination = destination.trim();
        let host = destination_host(destination)?;
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_string(),
            None => self.page_title(destination).await.unwrap_or(host),
        };

        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let slug = self.slugs.generate()?;
            match self.storage.add(&title, &slug, destination, owner_id).await {
                Ok(link) => {
                    info!(short_code = %link.slug, owner_id, "link created");
                    return Ok(ShortLink {
                        short_url: link.short_url(&self.short_domain),
                        link,
                    });
                }
                Err(StorageError::Conflict) => {
                    debug!(short_code = %slug, attempt, "slug already taken, retrying");
                }
                Err(err) => return Err(ServiceError::Unavailable(err)),
            }
        }

        warn!(owner_id, attempts = MAX_SLUG_ATTEMPTS, "no free slug found");
        Err(ServiceError::SlugExhausted(MAX_SLUG_ATTEMPTS))
    }

    async fn page_title(&self, destination: &str) -> Option<String> {
        let titles = self.titles.as_ref()?;
        let title = titles.extract(destination).await;
        debug!(destination, found = title.is_some(), "page title lookup");
        title
    }

    /// Resolve a short code. Read-only; nothing is recorded here.
    pub async fn expand(&self, code: &str) -> ServiceResult<Link> {
        if code.is_empty() || !is_url_safe(code) {
            return Err(ServiceError::NotFound);
        }
        Ok(self.storage.get(code).await?)
    }

    /// Record a visit in the background. The caller does not need to await
    /// the handle.
    pub fn track_redirect(&self, link: &Link, request: RequestInfo) -> JoinHandle<()> {
        self.recorder.spawn(link.id, request)
    }

    pub async fn statistics_detail(
        &self,
        owner_id: i64,
        slug: &str,
    ) -> ServiceResult<StatisticsReport> {
        self.stats.get_stats(owner_id, slug).await
    }

    /// Gap-filled visit counts for the chart of `range`
    pub async fn click_over_time(
        &self,
        owner_id: i64,
        slug: &str,
        range: TimeRange,
    ) -> ServiceResult<Vec<TimeSeriesPoint>> {
        let period = range.period(Utc::now());
        self.click_over_time_period(owner_id, slug, &period, range.granularity())
            .await
    }

    /// Gap-filled visit counts over an arbitrary period
    pub async fn click_over_time_period(
        &self,
        owner_id: i64,
        slug: &str,
        period: &Period,
        granularity: Granularity,
    ) -> ServiceResult<Vec<TimeSeriesPoint>> {
        let link = self.get_owned(owner_id, slug).await?;

        let points = match self
            .storage
            .visits_over_time(link.id, period, granularity)
            .await
        {
            Ok(points) => points,
            Err(StorageError::NotFound) => Vec::new(),
            Err(source) => {
                return Err(ServiceError::Aggregation {
                    query: "visits over time",
                    source,
                })
            }
        };

        Ok(fill_gaps(&points, period, granularity))
    }

    /// Every link of `owner_id` with visit totals and this month's counts
    pub async fn owner_statistics(&self, owner_id: i64) -> ServiceResult<OwnerOverview> {
        self.stats.owner_overview(owner_id).await
    }

    /// Links of `owner_id`, newest first, optionally filtered by `search`
    pub async fn list(&self, owner_id: i64, search: Option<&str>) -> ServiceResult<Vec<ShortLink>> {
        let links = self.storage.list(owner_id, search).await?;
        Ok(links
            .into_iter()
            .map(|mut link| {
                if link.title.is_empty() {
                    if let Ok(host) = destination_host(&link.destination) {
                        link.title = host;
                    }
                }
                ShortLink {
                    short_url: link.short_url(&self.short_domain),
                    link,
                }
            })
            .collect())
    }

    pub async fn get_by_id(&self, owner_id: i64, id: i64) -> ServiceResult<Link> {
        let link = self.storage.get_by_id(id).await?;
        if link.owner_id != owner_id {
            return Err(ServiceError::NotFound);
        }
        Ok(link)
    }

    /// Delete a link and all of its visits
    pub async fn delete(&self, owner_id: i64, slug: &str) -> ServiceResult<()> {
        self.storage.delete(slug, owner_id).await?;
        info!(short_code = %slug, owner_id, "link deleted");
        Ok(())
    }

    /// Fetch a link, hiding links that belong to someone else
    pub async fn get_owned(&self, owner_id: i64, slug: &str) -> ServiceResult<Link> {
        let link = self.storage.get_authoritative(slug).await?;
        if link.owner_id != owner_id {
            return Err(ServiceError::NotFound);
        }
        Ok(link)
    }

    pub async fn set_active(&self, owner_id: i64, slug: &str, active: bool) -> ServiceResult<Link> {
        self.get_owned(owner_id, slug).await?;
        self.storage.set_active(slug, active).await?;
        info!(short_code = %slug, active, "link activity changed");
        Ok(self.storage.get_authoritative(slug).await?)
    }
}

/// Validate an absolute http(s) URL and return its host
fn destination_host(destination: &str) -> ServiceResult<String> {
    let uri: Uri = destination
        .parse()
        .map_err(|_| ServiceError::InvalidDestination(destination.to_string()))?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(ServiceError::InvalidDestination(destination.to_string())),
    }

    uri.host()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::InvalidDestination(destination.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{GeoIpService, WootheeParser};
    use crate::models::{BrowserFact, IpLocation, NewVisit, Visit};
    use crate::storage::{
        BrowserCount, DeviceCount, LocationCount, ReferrerCount, SqliteStorage, StorageResult,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports a conflict for the first `conflicts` inserts
    struct CollidingStore {
        inner: SqliteStorage,
        conflicts: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl LinkStore for CollidingStore {
        async fn init(&self) -> anyhow::Result<()> {
            self.inner.init().await
        }
        async fn add(
            &self,
            title: &str,
            slug: &str,
            destination: &str,
            owner_id: i64,
        ) -> StorageResult<Link> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.conflicts {
                return Err(StorageError::Conflict);
            }
            self.inner.add(title, slug, destination, owner_id).await
        }
        async fn get(&self, slug: &str) -> StorageResult<Link> {
            self.inner.get(slug).await
        }
        async fn get_by_id(&self, id: i64) -> StorageResult<Link> {
            self.inner.get_by_id(id).await
        }
        async fn list(&self, owner_id: i64, search: Option<&str>) -> StorageResult<Vec<Link>> {
            self.inner.list(owner_id, search).await
        }
        async fn delete(&self, slug: &str, owner_id: i64) -> StorageResult<()> {
            self.inner.delete(slug, owner_id).await
        }
        async fn set_active(&self, slug: &str, active: bool) -> StorageResult<()> {
            self.inner.set_active(slug, active).await
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
            self.inner.visits_over_time(link_id, period, granularity).await
        }
    }

    fn service_over(storage: Arc<dyn LinkStore>) -> LinkService {
        let recorder = Arc::new(VisitRecorder::new(
            Arc::clone(&storage),
            Arc::new(GeoIpService::unloaded()),
            Arc::new(WootheeParser::new()),
        ));
        LinkService::new(storage, recorder, SlugGenerator::default(), "https://sho.rt/")
    }

    async fn colliding(conflicts: usize) -> (Arc<CollidingStore>, LinkService) {
        let inner = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        inner.init().await.unwrap();
        let store = Arc::new(CollidingStore {
            inner,
            conflicts,
            attempts: AtomicUsize::new(0),
        });
        let service = service_over(store.clone());
        (store, service)
    }

    #[test]
    fn test_destination_host() {
        assert_eq!(
            destination_host("https://example.com/a?b=c").unwrap(),
            "example.com"
        );
        assert!(matches!(
            destination_host("ftp://example.com"),
            Err(ServiceError::InvalidDestination(_))
        ));
        assert!(matches!(
            destination_host("example.com/path"),
            Err(ServiceError::InvalidDestination(_))
        ));
        assert!(destination_host("not a url").is_err());
    }

    #[tokio::test]
    async fn test_shorten_retries_after_conflicts() {
        let (store, service) = colliding(3).await;
        let created = service
            .shorten(7, "https://example.com/page", None)
            .await
            .unwrap();

        assert_eq!(store.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(created.link.title, "example.com");
        assert_eq!(created.link.slug.len(), 6);
        assert_eq!(
            created.short_url,
            format!("https://sho.rt/{}", created.link.slug)
        );
    }

    #[tokio::test]
    async fn test_shorten_gives_up_after_max_attempts() {
        let (store, service) = colliding(usize::MAX).await;
        let err = service
            .shorten(7, "https://example.com", Some("Example"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::SlugExhausted(MAX_SLUG_ATTEMPTS)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), MAX_SLUG_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_shorten_rejects_bad_destination() {
        let (store, service) = colliding(0).await;
        let err = service.shorten(1, "javascript:alert(1)", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidDestination(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expand_unknown_code() {
        let (_, service) = colliding(0).await;
        assert!(matches!(
            service.expand("nope12").await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            service.expand("../etc").await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_foreign_owner_is_not_found() {
        let (_, service) = colliding(0).await;
        let created = service.shorten(1, "https://example.com", None).await.unwrap();

        assert!(service.get_owned(1, &created.link.slug).await.is_ok());
        assert!(matches!(
            service.get_owned(2, &created.link.slug).await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            service.set_active(2, &created.link.slug, false).await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_click_over_time_without_visits() {
        let (_, service) = colliding(0).await;
        let created = service.shorten(1, "https://example.com", None).await.unwrap();

        let day = service
            .click_over_time(1, &created.link.slug, TimeRange::Day)
            .await
            .unwrap();
        assert_eq!(day.len(), 25);
        assert!(day.iter().all(|p| p.count == 0));

        let week = service
            .click_over_time(1, &created.link.slug, TimeRange::Week)
            .await
            .unwrap();
        assert_eq!(week.len(), 8);
    }

    struct FixedTitle(Option<&'static str>);

    #[async_trait]
    impl TitleExtractor for FixedTitle {
        async fn extract(&self, _url: &str) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[tokio::test]
    async fn test_shorten_uses_page_title() {
        let (store, _) = colliding(0).await;
        let service = service_over(store)
            .with_title_extractor(Arc::new(FixedTitle(Some("Example Domain"))));

        let created = service.shorten(1, "https://example.com", None).await.unwrap();
        assert_eq!(created.link.title, "Example Domain");

        let named = service
            .shorten(1, "https://example.com", Some("  Mine "))
            .await
            .unwrap();
        assert_eq!(named.link.title, "Mine");
    }

    #[tokio::test]
    async fn test_shorten_without_page_title_uses_host() {
        let (store, _) = colliding(0).await;
        let service = service_over(store).with_title_extractor(Arc::new(FixedTitle(None)));

        let created = service.shorten(1, "https://docs.rs/tokio", None).await.unwrap();
        assert_eq!(created.link.title, "docs.rs");
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped_and_searchable() {
        let (store, service) = colliding(0).await;
        let tokio_docs = service
            .shorten(1, "https://docs.rs/tokio", Some("Tokio docs"))
            .await
            .unwrap();
        service
            .shorten(1, "https://crates.io/crates/axum", Some("Axum"))
            .await
            .unwrap();
        service.shorten(2, "https://docs.rs/serde", None).await.unwrap();
        // Rows written without a title are listed under their host
        store.inner.add("", "untitled", "https://example.org/x", 1).await.unwrap();

        let all = service.list(1, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|l| l.link.owner_id == 1));
        let untitled = all.iter().find(|l| l.link.slug == "untitled").unwrap();
        assert_eq!(untitled.link.title, "example.org");
        assert_eq!(untitled.short_url, "https://sho.rt/untitled");

        let found = service.list(1, Some("TOKIO")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].link.slug, tokio_docs.link.slug);

        assert!(service.list(1, Some("serde")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_link_for_owner_only() {
        let (_, service) = colliding(0).await;
        let created = service.shorten(1, "https://example.com", None).await.unwrap();
        let slug = created.link.slug.clone();

        assert!(matches!(
            service.delete(2, &slug).await,
            Err(ServiceError::NotFound)
        ));
        assert!(service.expand(&slug).await.is_ok());

        service.delete(1, &slug).await.unwrap();
        assert!(matches!(service.expand(&slug).await, Err(ServiceError::NotFound)));
        assert!(matches!(service.delete(1, &slug).await, Err(ServiceError::NotFound)));
    }

    #[tokio::test]
    async fn test_get_by_id_hides_foreign_links() {
        let (_, service) = colliding(0).await;
        let created = service.shorten(1, "https://example.com", None).await.unwrap();

        let link = service.get_by_id(1, created.link.id).await.unwrap();
        assert_eq!(link.slug, created.link.slug);
        assert!(matches!(
            service.get_by_id(2, created.link.id).await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            service.get_by_id(1, created.link.id + 100).await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_click_over_time_for_custom_period() {
        let (store, service) = colliding(0).await;
        let created = service.shorten(1, "https://example.com", None).await.unwrap();

        let until = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let period = Period::new(until - TimeDelta::hours(5), until);
        let at = until.timestamp() - 3600;
        for _ in 0..2 {
            store
                .inner
                .track_visit(&NewVisit {
                    link_id: created.link.id,
                    ip_address: "198.51.100.4".to_string(),
                    user_agent: String::new(),
                    referer: None,
                    browser_id: None,
                    created_at: at,
                })
                .await
                .unwrap();
        }

        let points = service
            .click_over_time_period(1, &created.link.slug, &period, Granularity::Hour)
            .await
            .unwrap();
        assert_eq!(points.len(), 6);
        assert_eq!(points.iter().map(|p| p.count).sum::<i64>(), 2);
        let bucket = Granularity::Hour.truncate_unix(at);
        let hit = points.iter().find(|p| p.count == 2).unwrap();
        assert_eq!(hit.timestamp.timestamp(), bucket);

        assert!(matches!(
            service
                .click_over_time_period(2, &created.link.slug, &period, Granularity::Hour)
                .await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_owner_statistics() {
        let (store, service) = colliding(0).await;
        let quiet = service.shorten(1, "https://example.com/a", None).await.unwrap();
        let busy = service.shorten(1, "https://example.com/b", None).await.unwrap();
        service.shorten(2, "https://example.com/c", None).await.unwrap();

        for _ in 0..3 {
            store
                .inner
                .track_visit(&NewVisit {
                    link_id: busy.link.id,
                    ip_address: "198.51.100.4".to_string(),
                    user_agent: String::new(),
                    referer: None,
                    browser_id: None,
                    created_at: Utc::now().timestamp(),
                })
                .await
                .unwrap();
        }

        let overview = service.owner_statistics(1).await.unwrap();
        assert_eq!(overview.links.len(), 2);
        assert_eq!(overview.links[0].link.slug, busy.link.slug);
        assert_eq!(overview.links[0].link.visit_count, 3);
        assert_eq!(overview.links[1].link.slug, quiet.link.slug);
        assert_eq!(overview.total_visits, 3);
        assert_eq!(overview.links_this_month, 2);
        assert_eq!(overview.visits_this_month, 3);

        let empty = service.owner_statistics(9).await.unwrap();
        assert!(empty.links.is_empty());
        assert_eq!(empty.visits_this_month, 0);
    }
}
