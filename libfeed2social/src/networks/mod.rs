//! Network adapters
//!
//! Each supported social network gets one adapter implementing
//! [`NetworkAdapter`]. The distributor knows nothing about a network
//! beyond its [`NetworkKey`] and the `publish` capability; authentication,
//! payload shape and text length limits all stay inside the adapter.
//!
//! Adapters make exactly one outbound attempt per `publish` call. Retry
//! and timeout policy belongs to the distributor.

use std::sync::Arc;

use async_trait::async_trait;

use crate::composer::render_text;
use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{NetworkKey, PostContent};

pub mod bluesky;
pub mod misskey;
pub mod twitter;

// Built for all targets so integration tests can drive the distributor
pub mod mock;

pub use bluesky::BlueskyClient;
pub use misskey::MisskeyClient;
pub use mock::{MockConfig, MockNetwork};
pub use twitter::TwitterClient;

/// One posting destination
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    /// Identity persisted in each item's completion set
    fn key(&self) -> NetworkKey;

    /// Publish a post and return the network's identifier for it
    ///
    /// # Errors
    ///
    /// Failures are returned as `PlatformError` values and never affect
    /// other adapters publishing concurrently.
    async fn publish(&self, post: &PostContent) -> Result<String>;

    /// Text this adapter publishes for `post`
    fn render(&self, post: &PostContent) -> String {
        render_text(post, &[])
    }
}

/// Build the adapters for every enabled network, in `NetworkKey::ALL` order
///
/// Credentials are read here so that a missing token file stops the
/// process at startup instead of failing every delivery.
pub fn create_adapters(config: &Config) -> Result<Vec<Arc<dyn NetworkAdapter>>> {
    let tags = config.distribution.tags.clone();
    let mut adapters: Vec<Arc<dyn NetworkAdapter>> = Vec::new();

    for key in config.enabled_networks() {
        let adapter: Arc<dyn NetworkAdapter> = match key {
            NetworkKey::Misskey => match &config.misskey {
                Some(misskey) => Arc::new(MisskeyClient::from_config(misskey, tags.clone())?),
                None => continue,
            },
            NetworkKey::Bluesky => match &config.bluesky {
                Some(bluesky) => Arc::new(BlueskyClient::from_config(bluesky)?),
                None => continue,
            },
            NetworkKey::Twitter => match &config.twitter {
                Some(twitter) => Arc::new(TwitterClient::from_config(twitter, tags.clone())?),
                None => continue,
            },
        };
        tracing::debug!("Configured network adapter: {}", key);
        adapters.push(adapter);
    }

    Ok(adapters)
}

/// Shared HTTP client for adapters that talk plain REST
pub(crate) fn http_client(network: NetworkKey) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feed2social/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            PlatformError::Network(format!("Failed to create HTTP client for {}: {}", network, e))
                .into()
        })
}

/// Turn a non-success HTTP response into a classified error
pub(crate) async fn status_error(network: NetworkKey, response: reqwest::Response) -> PlatformError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    PlatformError::from_status(network.as_str(), status, &body)
}
