//! Twitter (X) adapter
//!
//! Posts through the v2 `POST /2/tweets` endpoint with OAuth 1.0a user
//! context. Requests are signed with HMAC-SHA1; the JSON body is not part
//! of the signature base string.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha1::Sha1;

use crate::composer::{fit_text, TextBudget};
use crate::config::{read_secret_file, TwitterConfig};
use crate::error::{PlatformError, Result};
use crate::networks::{http_client, status_error, NetworkAdapter};
use crate::types::{NetworkKey, PostContent};

const TWEETS_ENDPOINT: &str = "https://api.twitter.com/2/tweets";

type HmacSha1 = Hmac<Sha1>;

/// OAuth 1.0a application and user credentials
pub struct TwitterCredentials {
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub access_token: SecretString,
    pub access_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: Option<TweetData>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

pub struct TwitterClient {
    client: reqwest::Client,
    endpoint: String,
    credentials: TwitterCredentials,
    tags: Vec<String>,
}

impl TwitterClient {
    pub fn new(credentials: TwitterCredentials, tags: Vec<String>) -> Result<Self> {
        Self::with_endpoint(TWEETS_ENDPOINT, credentials, tags)
    }

    pub fn with_endpoint(
        endpoint: &str,
        credentials: TwitterCredentials,
        tags: Vec<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(NetworkKey::Twitter)?,
            endpoint: endpoint.to_string(),
            credentials,
            tags,
        })
    }

    pub fn from_config(config: &TwitterConfig, tags: Vec<String>) -> Result<Self> {
        let credentials = TwitterCredentials {
            api_key: read_secret_file(&config.api_key_file)?,
            api_secret: read_secret_file(&config.api_secret_file)?,
            access_token: read_secret_file(&config.access_token_file)?,
            access_secret: read_secret_file(&config.access_secret_file)?,
        };
        Self::new(credentials, tags)
    }

    fn authorization_header(&self) -> Result<String> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        authorization_header(
            "POST",
            &self.endpoint,
            &self.credentials,
            &nonce,
            &timestamp,
        )
    }
}

/// Build the `Authorization: OAuth ...` header value
fn authorization_header(
    method: &str,
    url: &str,
    credentials: &TwitterCredentials,
    nonce: &str,
    timestamp: &str,
) -> Result<String> {
    let mut params = vec![
        (
            "oauth_consumer_key".to_string(),
            credentials.api_key.expose_secret().to_string(),
        ),
        ("oauth_nonce".to_string(), nonce.to_string()),
        ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
        ("oauth_timestamp".to_string(), timestamp.to_string()),
        (
            "oauth_token".to_string(),
            credentials.access_token.expose_secret().to_string(),
        ),
        ("oauth_version".to_string(), "1.0".to_string()),
    ];

    let signature = sign(
        method,
        url,
        &params,
        credentials.api_secret.expose_secret(),
        credentials.access_secret.expose_secret(),
    )?;
    params.push(("oauth_signature".to_string(), signature));
    params.sort();

    let fields: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", encode(key), encode(value)))
        .collect();
    Ok(format!("OAuth {}", fields.join(", ")))
}

/// HMAC-SHA1 signature over the OAuth 1.0a signature base string
fn sign(
    method: &str,
    url: &str,
    params: &[(String, String)],
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String> {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(key, value)| (encode(key), encode(value)))
        .collect();
    encoded.sort();

    let parameter_string = encoded
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let base = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(url),
        encode(&parameter_string)
    );
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));

    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| PlatformError::Authentication(format!("Invalid signing key: {}", e)))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// RFC 3986 percent-encoding; only unreserved characters pass through
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl NetworkAdapter for TwitterClient {
    fn key(&self) -> NetworkKey {
        NetworkKey::Twitter
    }

    fn render(&self, post: &PostContent) -> String {
        fit_text(post, &self.tags, TextBudget::Twitter)
    }

    async fn publish(&self, post: &PostContent) -> Result<String> {
        let text = self.render(post);
        tracing::debug!("Posting to Twitter: {} characters", text.chars().count());

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, self.authorization_header()?)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(PlatformError::from)?;

        if !response.status().is_success() {
            return Err(status_error(NetworkKey::Twitter, response).await.into());
        }

        let tweet_id = match response.json::<TweetResponse>().await {
            Ok(TweetResponse { data: Some(data) }) => data.id,
            Ok(_) | Err(_) => {
                tracing::warn!("Twitter accepted the tweet but returned no tweet id");
                String::new()
            }
        };

        tracing::debug!("Posted to Twitter: {}", tweet_id);
        Ok(tweet_id)
    }
}
