use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single recorded redirect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Visit {
    pub id: i64,
    pub link_id: i64,
    /// Raw client address, possibly a forwarded-for chain
    pub ip_address: String,
    pub user_agent: String,
    pub referer: Option<String>,
    pub browser_id: Option<i64>,
    pub created_at: i64,
}

/// Insert payload for a visit row
#[derive(Debug, Clone)]
pub struct NewVisit {
    pub link_id: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub referer: Option<String>,
    pub browser_id: Option<i64>,
    pub created_at: i64,
}

/// Deduplicated browser facts parsed from a user agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct BrowserFact {
    pub name: String,
    pub version: String,
    pub platform: String,
    #[sqlx(rename = "mobile")]
    pub is_mobile: bool,
}

/// Geographic enrichment of a visit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IpLocation {
    pub address: String,
    pub country_code: String,
    pub country_name: String,
    pub subdivision: String,
    pub continent: String,
    pub city_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub source: String,
}

/// Request metadata captured on the redirect path and handed to the
/// background recorder.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub ip_address: String,
    pub user_agent: String,
    pub referer: Option<String>,
}

impl RequestInfo {
    pub fn new(
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        referer: Option<String>,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            referer,
        }
    }

    /// First hop of the address field. Proxies append to X-Forwarded-For,
    /// so the leftmost entry is the originating client.
    pub fn client_ip(&self) -> &str {
        self.ip_address
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default()
    }
}
