use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub slug: String,
    pub destination: String,
    pub title: String,
    pub owner_id: i64,
    pub is_archived: bool,
    pub is_active: bool,
    pub created_at: i64,
    pub visit_count: i64,
}

impl Link {
    /// Public URL of this link under `short_domain`
    pub fn short_url(&self, short_domain: &str) -> String {
        format!("{}/{}", short_domain.trim_end_matches('/'), self.slug)
    }
}

/// A freshly created link together with its public short URL
#[derive(Debug, Clone, Serialize)]
pub struct ShortLink {
    pub short_url: String,
    #[serde(flatten)]
    pub link: Link,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}
