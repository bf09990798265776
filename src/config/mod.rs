use anyhow::{bail, Context};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::shortcode::DEFAULT_SLUG_LENGTH;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub links: LinkConfig,
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Public base URL short codes are appended to
    pub short_domain: String,
    pub slug_length: usize,
    /// One of 301, 302, 307, 308
    pub redirect_status: u16,
    /// Fetch the destination's page title when a link is created without one
    pub fetch_titles: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Path to a MaxMind GeoLite2-City / GeoIP2-City database
    pub geoip_city_db: Option<String>,
    /// Base URL of an ipquery.io compatible lookup API
    pub geoip_api_url: Option<String>,
}

impl LinkConfig {
    pub fn redirect_status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.redirect_status).unwrap_or(StatusCode::MOVED_PERMANENTLY)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            short_domain: "http://127.0.0.1:3000".to_string(),
            slug_length: DEFAULT_SLUG_LENGTH,
            redirect_status: 301,
            fetch_titles: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl_secs: 60,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./linkstat.db".to_string());
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_or("API_PORT", 8080u16)?;

        let redirect_host =
            std::env::var("REDIRECT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redirect_port = env_or("REDIRECT_PORT", 3000u16)?;

        let short_domain = std::env::var("SHORT_DOMAIN")
            .unwrap_or_else(|_| format!("http://{redirect_host}:{redirect_port}"));
        let slug_length = env_or("SLUG_LENGTH", DEFAULT_SLUG_LENGTH)?;
        if slug_length == 0 {
            bail!("SLUG_LENGTH must be at least 1");
        }

        let redirect_status = env_or("REDIRECT_STATUS", 301u16)?;
        if !matches!(redirect_status, 301 | 302 | 307 | 308) {
            bail!("REDIRECT_STATUS must be one of 301, 302, 307, 308 (got {redirect_status})");
        }

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            enabled: env_flag("CACHE_ENABLED", cache_defaults.enabled),
            max_entries: env_or("CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            ttl_secs: env_or("CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            links: LinkConfig {
                short_domain,
                slug_length,
                redirect_status,
                fetch_titles: env_flag("FETCH_TITLES", true),
            },
            cache,
            analytics: AnalyticsConfig {
                geoip_city_db: env_opt("GEOIP_CITY_DB"),
                geoip_api_url: env_opt("GEOIP_API_URL"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_status_code() {
        let links = LinkConfig {
            redirect_status: 302,
            ..LinkConfig::default()
        };
        assert_eq!(links.redirect_status_code(), StatusCode::FOUND);
        assert_eq!(
            LinkConfig::default().redirect_status_code(),
            StatusCode::MOVED_PERMANENTLY
        );
    }

    #[test]
    fn test_env_or_default_when_unset() {
        let value = env_or("LINKSTAT_TEST_SURELY_UNSET_VAR", 42u32).unwrap();
        assert_eq!(value, 42);
    }
}
