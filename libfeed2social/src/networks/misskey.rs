//! Misskey adapter
//!
//! Creates a public note through `POST /api/notes/create`, authenticated
//! with an API token passed in the request body as `i`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::composer::{fit_text, TextBudget};
use crate::config::{read_secret_file, MisskeyConfig};
use crate::error::{PlatformError, Result};
use crate::networks::{http_client, status_error, NetworkAdapter};
use crate::types::{NetworkKey, PostContent};

/// Default note length limit on misskey.io
const MISSKEY_CHARACTER_LIMIT: usize = 3000;

#[derive(Debug, Deserialize)]
struct CreateNoteResponse {
    #[serde(rename = "createdNote")]
    created_note: Option<CreatedNote>,
}

#[derive(Debug, Deserialize)]
struct CreatedNote {
    id: String,
}

pub struct MisskeyClient {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
    tags: Vec<String>,
}

impl MisskeyClient {
    pub fn new(instance: &str, token: SecretString, tags: Vec<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(NetworkKey::Misskey)?,
            endpoint: format!("{}/api/notes/create", instance_base(instance)),
            token,
            tags,
        })
    }

    pub fn from_config(config: &MisskeyConfig, tags: Vec<String>) -> Result<Self> {
        let token = read_secret_file(&config.token_file)?;
        Self::new(&config.instance, token, tags)
    }
}

/// `misskey.io` and `https://misskey.io/` both name the same instance
fn instance_base(instance: &str) -> String {
    let trimmed = instance.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[async_trait]
impl NetworkAdapter for MisskeyClient {
    fn key(&self) -> NetworkKey {
        NetworkKey::Misskey
    }

    fn render(&self, post: &PostContent) -> String {
        fit_text(post, &self.tags, TextBudget::Chars(MISSKEY_CHARACTER_LIMIT))
    }

    async fn publish(&self, post: &PostContent) -> Result<String> {
        let text = self.render(post);
        tracing::debug!("Posting to Misskey: {} characters", text.chars().count());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "i": self.token.expose_secret(),
                "text": text,
            }))
            .send()
            .await
            .map_err(PlatformError::from)?;

        if !response.status().is_success() {
            return Err(status_error(NetworkKey::Misskey, response).await.into());
        }

        // A 2xx means the note exists, whatever the body says
        let note_id = match response.json::<CreateNoteResponse>().await {
            Ok(CreateNoteResponse {
                created_note: Some(note),
            }) => note.id,
            Ok(_) | Err(_) => {
                tracing::warn!("Misskey accepted the note but returned no note id");
                String::new()
            }
        };

        tracing::debug!("Posted to Misskey: {}", note_id);
        Ok(note_id)
    }
}
