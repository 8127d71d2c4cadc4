//! Bluesky adapter

use async_trait::async_trait;
use bsky_sdk::agent::config::Config as AgentConfig;
use bsky_sdk::api::app::bsky::feed::post::RecordData;
use bsky_sdk::api::types::string::Datetime;
use bsky_sdk::rich_text::RichText;
use bsky_sdk::BskyAgent;
use secrecy::{ExposeSecret, SecretString};

use crate::composer::{fit_text, TextBudget};
use crate::config::{read_secret_file, BlueskyConfig};
use crate::error::{PlatformError, Result};
use crate::networks::NetworkAdapter;
use crate::types::{NetworkKey, PostContent};

const BLUESKY_CHARACTER_LIMIT: usize = 300;

/// Map Bluesky/AT Protocol errors to PlatformError
///
/// bsky-sdk surfaces XRPC failures as opaque errors, so the status code or
/// AT Protocol error name is recovered from the message.
fn map_bluesky_error<E: std::fmt::Display + std::fmt::Debug>(
    error: E,
    context: &str,
) -> PlatformError {
    let error_msg = format!("{}", error);
    let debug_msg = format!("{:?}", error);

    if error_msg.contains("401")
        || error_msg.contains("403")
        || error_msg.contains("AuthenticationRequired")
        || error_msg.contains("InvalidToken")
        || error_msg.contains("ExpiredToken")
        || error_msg.contains("AuthFactorTokenRequired")
        || debug_msg.contains("Unauthorized")
        || debug_msg.contains("Forbidden")
    {
        return PlatformError::Authentication(format!(
            "Bluesky authentication failed during {}: {}",
            context, error_msg
        ));
    }

    if error_msg.contains("InvalidCredentials")
        || error_msg.contains("AccountNotFound")
        || (context == "login" && error_msg.contains("invalid"))
    {
        return PlatformError::Authentication(format!(
            "Invalid Bluesky credentials: {}. Check the handle and app password.",
            error_msg
        ));
    }

    if error_msg.contains("429")
        || error_msg.contains("RateLimitExceeded")
        || error_msg.contains("TooManyRequests")
        || debug_msg.contains("RateLimit")
    {
        return PlatformError::RateLimit(format!(
            "Bluesky rate limit exceeded during {}: {}",
            context, error_msg
        ));
    }

    if error_msg.contains("400")
        || error_msg.contains("InvalidRequest")
        || error_msg.contains("InvalidRecord")
        || debug_msg.contains("BadRequest")
    {
        return PlatformError::Validation(format!(
            "Bluesky rejected the request during {}: {}",
            context, error_msg
        ));
    }

    if error_msg.contains("connection")
        || error_msg.contains("timeout")
        || error_msg.contains("timed out")
        || error_msg.contains("dns")
        || debug_msg.contains("Connect")
        || debug_msg.contains("Timeout")
    {
        return PlatformError::Network(format!(
            "Could not reach the Bluesky PDS during {}: {}",
            context, error_msg
        ));
    }

    PlatformError::Posting(format!(
        "Bluesky operation failed during {}: {}",
        context, error_msg
    ))
}

/// Posts to Bluesky with a handle and app password
///
/// A fresh session is created for every publish. Runs are hourly at most,
/// so there is no session to keep alive between them.
pub struct BlueskyClient {
    handle: String,
    app_password: SecretString,
    service: String,
}

impl BlueskyClient {
    pub fn new(handle: String, app_password: SecretString, service: String) -> Self {
        Self {
            handle,
            app_password,
            service,
        }
    }

    pub fn from_config(config: &BlueskyConfig) -> Result<Self> {
        let app_password = read_secret_file(&config.app_password_file)?;
        Ok(Self::new(
            config.handle.clone(),
            app_password,
            config.service.clone(),
        ))
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    async fn login(&self) -> Result<BskyAgent> {
        tracing::debug!("Creating Bluesky session for handle: {}", self.handle);

        let agent = BskyAgent::builder()
            .config(AgentConfig {
                endpoint: self.service.clone(),
                ..Default::default()
            })
            .build()
            .await
            .map_err(|e| map_bluesky_error(e, "agent setup"))?;

        agent
            .login(&self.handle, self.app_password.expose_secret())
            .await
            .map_err(|e| map_bluesky_error(e, "login"))?;

        Ok(agent)
    }
}

#[async_trait]
impl NetworkAdapter for BlueskyClient {
    fn key(&self) -> NetworkKey {
        NetworkKey::Bluesky
    }

    fn render(&self, post: &PostContent) -> String {
        fit_text(post, &[], TextBudget::Chars(BLUESKY_CHARACTER_LIMIT))
    }

    async fn publish(&self, post: &PostContent) -> Result<String> {
        let agent = self.login().await?;
        let text = self.render(post);

        // Links are only clickable when declared as facets
        let rich_text = RichText::new_with_detect_facets(&text)
            .await
            .map_err(|e| map_bluesky_error(e, "facet detection"))?;

        tracing::debug!("Posting to Bluesky: {} characters", text.chars().count());

        let record = RecordData {
            created_at: Datetime::now(),
            embed: None,
            entities: None,
            facets: rich_text.facets,
            labels: None,
            langs: None,
            reply: None,
            tags: None,
            text: rich_text.text,
        };

        let response = agent
            .create_record(record)
            .await
            .map_err(|e| map_bluesky_error(e, "posting"))?;

        let at_uri = response.uri.to_string();
        tracing::debug!("Posted to Bluesky: {}", at_uri);

        Ok(at_uri)
    }
}
