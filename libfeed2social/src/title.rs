//! Page title resolution
//!
//! The title stored in the content source is whatever the author typed.
//! The linked page's own title is usually the better headline, so it is
//! fetched and the two are compared by the composer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::encoding::decode_html;
use crate::error::{PlatformError, Result};

/// Bytes of a page read before giving up on finding more of `<head>`
const MAX_PAGE_BYTES: usize = 1024 * 1024;

/// Resolves a display title for a URL
#[async_trait]
pub trait TitleResolver: Send + Sync {
    /// Best-effort title of the page at `url`
    ///
    /// Returns an empty string when the page is unreachable or has no
    /// title. Callers treat empty as "keep the source title".
    async fn resolve(&self, url: &str) -> String;
}

/// Fetches the page over HTTP and reads `og:title` or `<title>`
pub struct HttpTitleResolver {
    client: reqwest::Client,
}

impl HttpTitleResolver {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn fetch_title(&self, url: &str) -> std::result::Result<String, reqwest::Error> {
        let mut response = self
            .client
            .get(url)
            .header(ACCEPT, "text/html")
            .send()
            .await?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let take = chunk.len().min(MAX_PAGE_BYTES - bytes.len());
            bytes.extend_from_slice(&chunk[..take]);
            if bytes.len() >= MAX_PAGE_BYTES {
                debug!("Stopped reading {} after {} bytes", url, bytes.len());
                break;
            }
        }

        let html = decode_html(&bytes, content_type.as_deref());
        Ok(extract_title(&html))
    }
}

#[async_trait]
impl TitleResolver for HttpTitleResolver {
    async fn resolve(&self, url: &str) -> String {
        match self.fetch_title(url).await {
            Ok(title) => {
                debug!("Resolved title for {}: {:?}", url, title);
                title
            }
            Err(e) => {
                warn!("Failed to fetch page title for {}: {}", url, e);
                String::new()
            }
        }
    }
}

/// Resolver that never finds a title, used when resolution is disabled
pub struct NoopTitleResolver;

#[async_trait]
impl TitleResolver for NoopTitleResolver {
    async fn resolve(&self, _url: &str) -> String {
        String::new()
    }
}

/// Title of an HTML document
///
/// `og:title` wins over `<title>` because sites tend to put the bare
/// headline there, without the site name suffix.
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);

    let og_title = Selector::parse(r#"meta[property="og:title"]"#)
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .filter_map(|el| el.value().attr("content"))
                .map(str::trim)
                .find(|content| !content.is_empty())
                .map(str::to_string)
        });
    if let Some(title) = og_title {
        return title;
    }

    Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}
