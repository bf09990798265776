use crate::analytics::timeseries::{Granularity, Period, TimeSeriesPoint};
use crate::models::{BrowserFact, IpLocation, Link, NewVisit, Visit};
use crate::storage::trait_def::{bucket_range, search_pattern, to_points, unix_now};
use crate::storage::{
    BrowserCount, DeviceCount, LinkStore, LocationCount, ReferrerCount, StorageError,
    StorageResult,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

const LINK_COLUMNS: &str =
    "id, slug, destination, title, owner_id, is_archived, is_active, created_at, visit_count";

const VISIT_COLUMNS: &str =
    "id, link_id, ip_address, user_agent, referer, browser_id, created_at";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl LinkStore for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug TEXT NOT NULL UNIQUE,
                destination TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                owner_id INTEGER NOT NULL,
                is_archived BOOLEAN NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                visit_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner ON links(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS browsers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                platform TEXT NOT NULL,
                mobile BOOLEAN NOT NULL,
                UNIQUE (name, version, platform, mobile)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id),
                ip_address TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                referer TEXT,
                browser_id INTEGER REFERENCES browsers(id),
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_visits_link_time ON visits(link_id, created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visit_locations (
                visit_id INTEGER PRIMARY KEY REFERENCES visits(id),
                address TEXT NOT NULL,
                country_code TEXT NOT NULL,
                country_name TEXT NOT NULL,
                subdivision TEXT NOT NULL,
                continent TEXT NOT NULL,
                city_name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                source TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn add(
        &self,
        title: &str,
        slug: &str,
        destination: &str,
        owner_id: i64,
    ) -> StorageResult<Link> {
        let result = sqlx::query(
            r#"
            INSERT INTO links (slug, destination, title, owner_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(slug)
        .bind(destination)
        .bind(title)
        .bind(owner_id)
        .bind(unix_now())
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        self.get(slug).await
    }

    async fn get(&self, slug: &str) -> StorageResult<Link> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn get_by_id(&self, id: i64) -> StorageResult<Link> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn list(&self, owner_id: i64, search: Option<&str>) -> StorageResult<Vec<Link>> {
        let links = match search_pattern(search) {
            Some(pattern) => {
                sqlx::query_as::<_, Link>(&format!(
                    r#"
                    SELECT {LINK_COLUMNS} FROM links
                    WHERE owner_id = ?
                      AND (LOWER(title) LIKE ? ESCAPE '\'
                        OR LOWER(destination) LIKE ? ESCAPE '\'
                        OR LOWER(slug) LIKE ? ESCAPE '\')
                    ORDER BY created_at DESC, id DESC
                    "#
                ))
                .bind(owner_id)
                .bind(&pattern)
                .bind(&pattern)
                .bind(&pattern)
                .fetch_all(self.pool.as_ref())
                .await?
            }
            None => {
                sqlx::query_as::<_, Link>(&format!(
                    "SELECT {LINK_COLUMNS} FROM links WHERE owner_id = ? ORDER BY created_at DESC, id DESC"
                ))
                .bind(owner_id)
                .fetch_all(self.pool.as_ref())
                .await?
            }
        };

        Ok(links)
    }

    async fn delete(&self, slug: &str, owner_id: i64) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let link_id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM links WHERE slug = ? AND owner_id = ?",
        )
        .bind(slug)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StorageError::NotFound)?;

        sqlx::query(
            "DELETE FROM visit_locations WHERE visit_id IN (SELECT id FROM visits WHERE link_id = ?)",
        )
        .bind(link_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM visits WHERE link_id = ?")
            .bind(link_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM links WHERE id = ?")
            .bind(link_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_active(&self, slug: &str, active: bool) -> StorageResult<()> {
        let result = sqlx::query("UPDATE links SET is_active = ? WHERE slug = ?")
            .bind(active)
            .bind(slug)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn track_visit(&self, visit: &NewVisit) -> StorageResult<Visit> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Visit>(&format!(
            r#"
            INSERT INTO visits (link_id, ip_address, user_agent, referer, browser_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {VISIT_COLUMNS}
            "#
        ))
        .bind(visit.link_id)
        .bind(&visit.ip_address)
        .bind(&visit.user_agent)
        .bind(visit.referer.as_deref())
        .bind(visit.browser_id)
        .bind(visit.created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE links SET visit_count = visit_count + 1 WHERE id = ?")
            .bind(visit.link_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn upsert_browser(&self, browser: &BrowserFact) -> StorageResult<i64> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO browsers (name, version, platform, mobile)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (name, version, platform, mobile) DO UPDATE SET name = excluded.name
            RETURNING id
            "#,
        )
        .bind(&browser.name)
        .bind(&browser.version)
        .bind(&browser.platform)
        .bind(browser.is_mobile)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(id)
    }

    async fn insert_visit_location(
        &self,
        visit_id: i64,
        location: &IpLocation,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO visit_locations (
                visit_id, address, country_code, country_name, subdivision,
                continent, city_name, latitude, longitude, source
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(visit_id)
        .bind(&location.address)
        .bind(&location.country_code)
        .bind(&location.country_name)
        .bind(&location.subdivision)
        .bind(&location.continent)
        .bind(&location.city_name)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.source)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn visit_location(&self, visit_id: i64) -> StorageResult<Option<IpLocation>> {
        let location = sqlx::query_as::<_, IpLocation>(
            r#"
            SELECT address, country_code, country_name, subdivision, continent,
                   city_name, latitude, longitude, source
            FROM visit_locations
            WHERE visit_id = ?
            "#,
        )
        .bind(visit_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(location)
    }

    async fn visits_for_link(&self, link_id: i64) -> StorageResult<Vec<Visit>> {
        let visits = sqlx::query_as::<_, Visit>(&format!(
            "SELECT {VISIT_COLUMNS} FROM visits WHERE link_id = ? ORDER BY created_at, id"
        ))
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(visits)
    }

    async fn location_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<LocationCount>> {
        let rows = sqlx::query_as::<_, LocationCount>(
            r#"
            SELECT l.country_code AS country_code,
                   COALESCE(l.country_name, 'Unknown') AS country_name,
                   COUNT(*) AS visits
            FROM visits v
            JOIN links u ON u.id = v.link_id
            LEFT JOIN visit_locations l ON l.visit_id = v.id
            WHERE v.link_id = ? AND u.owner_id = ?
            GROUP BY l.country_code, l.country_name
            ORDER BY visits DESC, country_name
            "#,
        )
        .bind(link_id)
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn browser_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<BrowserCount>> {
        let rows = sqlx::query_as::<_, BrowserCount>(
            r#"
            SELECT b.name, b.version, b.platform, b.mobile, COUNT(*) AS visits
            FROM visits v
            JOIN links u ON u.id = v.link_id
            JOIN browsers b ON b.id = v.browser_id
            WHERE v.link_id = ? AND u.owner_id = ?
            GROUP BY b.id, b.name, b.version, b.platform, b.mobile
            ORDER BY visits DESC, b.name
            "#,
        )
        .bind(link_id)
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn device_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<DeviceCount>> {
        let rows = sqlx::query_as::<_, DeviceCount>(
            r#"
            SELECT b.mobile AS mobile, COUNT(*) AS visits
            FROM visits v
            JOIN links u ON u.id = v.link_id
            JOIN browsers b ON b.id = v.browser_id
            WHERE v.link_id = ? AND u.owner_id = ?
            GROUP BY b.mobile
            "#,
        )
        .bind(link_id)
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn referrer_distribution(
        &self,
        owner_id: i64,
        link_id: i64,
    ) -> StorageResult<Vec<ReferrerCount>> {
        let rows = sqlx::query_as::<_, ReferrerCount>(
            r#"
            SELECT COALESCE(v.referer, '') AS source, COUNT(*) AS visits
            FROM visits v
            JOIN links u ON u.id = v.link_id
            WHERE v.link_id = ? AND u.owner_id = ?
            GROUP BY COALESCE(v.referer, '')
            ORDER BY visits DESC, source
            "#,
        )
        .bind(link_id)
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn total_visits(&self, link_id: i64) -> StorageResult<i64> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visits WHERE link_id = ?")
            .bind(link_id)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(total)
    }

    async fn count_links_since(&self, owner_id: i64, since: i64) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM links WHERE owner_id = ? AND created_at >= ?",
        )
        .bind(owner_id)
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn count_visits_since(&self, owner_id: i64, since: i64) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM visits v
            JOIN links u ON u.id = v.link_id
            WHERE u.owner_id = ? AND v.created_at >= ?
            "#,
        )
        .bind(owner_id)
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn unique_visitors(&self, link_id: i64) -> StorageResult<i64> {
        let unique = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT ip_address) FROM visits WHERE link_id = ?",
        )
        .bind(link_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(unique)
    }

    async fn visits_over_time(
        &self,
        link_id: i64,
        period: &Period,
        granularity: Granularity,
    ) -> StorageResult<Vec<TimeSeriesPoint>> {
        let (start, end) = bucket_range(period, granularity);
        let step = granularity.seconds();

        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT (created_at / ?) * ? AS bucket, COUNT(*) AS visits
            FROM visits
            WHERE link_id = ? AND created_at >= ? AND created_at < ?
            GROUP BY bucket
            ORDER BY bucket
            "#,
        )
        .bind(step)
        .bind(step)
        .bind(link_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(to_points(rows))
    }
}
