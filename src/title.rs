//! Page titles for links created without one

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Stop reading a page after this many bytes
const MAX_SCAN_BYTES: usize = 64 * 1024;

#[async_trait]
pub trait TitleExtractor: Send + Sync {
    /// Title of the page at `url`. `None` when the page cannot be fetched or
    /// has no title in its head.
    async fn extract(&self, url: &str) -> Option<String>;
}

/// Fetches the destination and reads `<title>` out of `<head>`
pub struct HttpTitleExtractor {
    client: reqwest::Client,
}

impl HttpTitleExtractor {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client })
    }

    async fn fetch_head(&self, url: &str) -> reqwest::Result<String> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() >= MAX_SCAN_BYTES || contains_head_end(&body) {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn contains_head_end(body: &[u8]) -> bool {
    body.windows(7)
        .any(|window| window.eq_ignore_ascii_case(b"</head>"))
}

#[async_trait]
impl TitleExtractor for HttpTitleExtractor {
    async fn extract(&self, url: &str) -> Option<String> {
        match self.fetch_head(url).await {
            Ok(html) => find_title(&html),
            Err(err) => {
                debug!(url, error = %err, "failed to fetch page title");
                None
            }
        }
    }
}

/// Title extractor for the service, or `None` when title fetching is off
pub fn title_extractor_from_config(config: &LinkConfig) -> Option<Arc<dyn TitleExtractor>> {
    if !config.fetch_titles {
        info!("Page titles: fetching disabled, untitled links use their host");
        return None;
    }

    match HttpTitleExtractor::new() {
        Ok(extractor) => Some(Arc::new(extractor)),
        Err(e) => {
            warn!("Page titles: failed to build HTTP client: {}", e);
            None
        }
    }
}

/// Text of the first `<title>` inside `<head>`. Tags nested in the title are
/// dropped and whitespace is collapsed. Scanning stops at `</head>`.
pub fn find_title(html: &str) -> Option<String> {
    let mut in_head = false;
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let close = after.find('>')?;
        let tag = &after[..close];
        rest = &after[close + 1..];

        let (closing, tag) = match tag.strip_prefix('/') {
            Some(tag) => (true, tag),
            None => (false, tag),
        };
        let name = tag
            .split(|c: char| c.is_ascii_whitespace() || c == '/')
            .next()
            .unwrap_or_default();

        if closing {
            if name.eq_ignore_ascii_case("head") {
                return None;
            }
        } else if name.eq_ignore_ascii_case("head") {
            in_head = true;
        } else if in_head && name.eq_ignore_ascii_case("title") {
            let end = rest.to_ascii_lowercase().find("</title")?;
            let title = decode_entities(&strip_tags(&rest[..end]))
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            return (!title.is_empty()).then_some(title);
        }
    }

    None
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_title() {
        assert_eq!(find_title(""), None);
        assert_eq!(
            find_title("<html><body><h1>Hello, World!</h1></body></html>"),
            None
        );
        assert_eq!(
            find_title(
                "<html><head><title>Page Title</title></head><body><h1>Hello, World!</h1></body></html>"
            )
            .as_deref(),
            Some("Page Title")
        );
    }

    #[test]
    fn test_find_title_ignores_body_titles() {
        let html = "<html><head><meta charset=\"utf-8\"></head><body><title>Late</title></body></html>";
        assert_eq!(find_title(html), None);
    }

    #[test]
    fn test_find_title_cleans_text() {
        let html = "<HTML><HEAD lang=\"en\">\n<TITLE>\n  Fish &amp; <b>Chips</b>\n</TITLE></HEAD></HTML>";
        assert_eq!(find_title(html).as_deref(), Some("Fish & Chips"));
    }

    #[test]
    fn test_find_title_blank_is_none() {
        assert_eq!(find_title("<head><title>   </title></head>"), None);
        assert_eq!(find_title("<head><title>Unterminated"), None);
    }

    #[test]
    fn test_contains_head_end() {
        assert!(contains_head_end(b"<head></HEAD>"));
        assert!(!contains_head_end(b"<head><title>x</title>"));
    }

    #[test]
    fn test_disabled_in_config() {
        let config = LinkConfig {
            fetch_titles: false,
            ..LinkConfig::default()
        };
        assert!(title_extractor_from_config(&config).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_page_has_no_title() {
        let extractor = HttpTitleExtractor::new().unwrap();
        assert_eq!(extractor.extract("http://127.0.0.1:9/").await, None);
    }
}
