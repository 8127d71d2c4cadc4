//! Notion database source
//!
//! Items are pages of a Notion database. Three page properties are used:
//! a title, a URL, and a multi-select holding the networks each page has
//! been delivered to. An optional checkbox lets authors exclude a page.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{read_secret_file, NotionConfig};
use crate::error::{Result, SourceError};
use crate::source::SourceRepository;
use crate::types::{FeedItem, NetworkKey, PendingFilter, RecencyWindow};

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// Names of the database properties read and written
#[derive(Debug, Clone)]
pub struct NotionProperties {
    pub title: String,
    pub url: String,
    pub completed: String,
    pub skip: Option<String>,
}

pub struct NotionSource {
    client: reqwest::Client,
    api_base: String,
    database_id: String,
    token: SecretString,
    properties: NotionProperties,
    /// Completed option names this build does not know, per page. Written
    /// back on save so other tools' entries survive.
    unrecognized: Mutex<HashMap<String, BTreeSet<String>>>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    created_time: DateTime<Utc>,
    properties: HashMap<String, PropertyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PropertyValue {
    Title { title: Vec<RichTextSpan> },
    Url { url: Option<String> },
    MultiSelect { multi_select: Vec<SelectOption> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RichTextSpan {
    plain_text: String,
}

#[derive(Debug, Deserialize)]
struct SelectOption {
    name: String,
}

impl NotionSource {
    pub fn new(
        api_base: &str,
        database_id: &str,
        token: SecretString,
        properties: NotionProperties,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("notion-version", HeaderValue::from_static(NOTION_VERSION));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(SourceError::from)?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            database_id: database_id.to_string(),
            token,
            properties,
            unrecognized: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &NotionConfig) -> Result<Self> {
        let token = read_secret_file(&config.token_file)?;
        let properties = NotionProperties {
            title: config.title_property.clone(),
            url: config.url_property.clone(),
            completed: config.completed_property.clone(),
            // An empty name disables the skip checkbox
            skip: config.skip_property.clone().filter(|name| !name.is_empty()),
        };
        Self::new(&config.api_base, &config.database_id, token, properties)
    }

    /// The database query filter equivalent to `filter`
    fn query_filter(&self, filter: &PendingFilter) -> Value {
        let recency = match filter.recency {
            RecencyWindow::ThisWeek => json!({
                "timestamp": "created_time",
                "created_time": { "this_week": {} },
            }),
            RecencyWindow::Within(_) => json!({
                "timestamp": "created_time",
                "created_time": { "on_or_after": filter.recency.cutoff(Utc::now()).to_rfc3339() },
            }),
        };

        let mut conditions = vec![recency];
        if filter.require_url {
            conditions.push(json!({
                "property": self.properties.url,
                "url": { "is_not_empty": true },
            }));
        }
        if let Some(skip) = &self.properties.skip {
            conditions.push(json!({
                "property": skip,
                "checkbox": { "does_not_equal": true },
            }));
        }

        let outstanding: Vec<Value> = filter
            .networks
            .iter()
            .map(|key| {
                json!({
                    "property": self.properties.completed,
                    "multi_select": { "does_not_contain": key.as_str() },
                })
            })
            .collect();
        conditions.push(json!({ "or": outstanding }));

        json!({ "and": conditions })
    }

    async fn query_page(&self, filter: &Value, cursor: Option<&str>) -> Result<QueryResponse> {
        let mut body = json!({
            "filter": filter,
            "sorts": [{ "timestamp": "created_time", "direction": "descending" }],
            "page_size": PAGE_SIZE,
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        let url = format!("{}/databases/{}/query", self.api_base, self.database_id);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer())
            .json(&body)
            .send()
            .await
            .map_err(SourceError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        Ok(response.json().await.map_err(SourceError::from)?)
    }

    fn unrecognized(&self) -> MutexGuard<'_, HashMap<String, BTreeSet<String>>> {
        self.unrecognized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    /// Parse one query result into an item
    ///
    /// Returns `Ok(None)` for results that are not pages or have no link.
    fn decode(&self, value: Value) -> Result<Option<FeedItem>> {
        if value.get("object").and_then(Value::as_str) != Some("page") {
            tracing::debug!("Skipping non-page query result");
            return Ok(None);
        }

        let item_id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        let decode_error = |reason: String| SourceError::Decode {
            item_id: item_id.clone(),
            reason,
        };

        let page: Page = serde_json::from_value(value).map_err(|e| decode_error(e.to_string()))?;

        let title = match page.properties.get(&self.properties.title) {
            Some(PropertyValue::Title { title }) => {
                title.iter().map(|span| span.plain_text.as_str()).collect::<String>()
            }
            Some(_) => {
                return Err(decode_error(format!(
                    "property '{}' is not a title",
                    self.properties.title
                ))
                .into())
            }
            None => {
                return Err(
                    decode_error(format!("missing property '{}'", self.properties.title)).into(),
                )
            }
        };

        let url = match page.properties.get(&self.properties.url) {
            Some(PropertyValue::Url { url }) => url.clone().unwrap_or_default(),
            Some(_) => {
                return Err(
                    decode_error(format!("property '{}' is not a URL", self.properties.url))
                        .into(),
                )
            }
            None => {
                return Err(
                    decode_error(format!("missing property '{}'", self.properties.url)).into(),
                )
            }
        };
        if url.trim().is_empty() {
            tracing::debug!("Skipping page {} without a link", page.id);
            return Ok(None);
        }

        let mut unknown = BTreeSet::new();
        let completed: BTreeSet<NetworkKey> = match page.properties.get(&self.properties.completed)
        {
            Some(PropertyValue::MultiSelect { multi_select }) => multi_select
                .iter()
                .filter_map(|option| match option.name.parse() {
                    Ok(key) => Some(key),
                    Err(_) => {
                        tracing::warn!(
                            "Ignoring unknown network '{}' on page {}",
                            option.name,
                            page.id
                        );
                        unknown.insert(option.name.clone());
                        None
                    }
                })
                .collect(),
            Some(_) => {
                return Err(decode_error(format!(
                    "property '{}' is not a multi-select",
                    self.properties.completed
                ))
                .into())
            }
            None => BTreeSet::new(),
        };

        if unknown.is_empty() {
            self.unrecognized().remove(&page.id);
        } else {
            self.unrecognized().insert(page.id.clone(), unknown);
        }

        Ok(Some(FeedItem {
            id: page.id,
            title,
            url,
            created_at: page.created_time,
            completed,
        }))
    }
}

#[async_trait]
impl SourceRepository for NotionSource {
    async fn fetch_pending(&self, filter: &PendingFilter) -> Result<Vec<FeedItem>> {
        if filter.networks.is_empty() {
            return Ok(Vec::new());
        }

        let query_filter = self.query_filter(filter);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response = self.query_page(&query_filter, cursor.as_deref()).await?;
            for value in response.results {
                if let Some(item) = self.decode(value)? {
                    items.push(item);
                }
            }

            match response.next_cursor {
                Some(next) if response.has_more => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!("Fetched {} pending items from Notion", items.len());
        Ok(items)
    }

    async fn save(&self, item: &FeedItem) -> Result<()> {
        // The PATCH replaces the whole multi-select
        let mut names: BTreeSet<String> = self
            .unrecognized()
            .get(&item.id)
            .cloned()
            .unwrap_or_default();
        names.extend(item.completed.iter().map(|key| key.as_str().to_string()));
        let options: Vec<Value> = names.iter().map(|name| json!({ "name": name })).collect();

        let mut properties = serde_json::Map::new();
        properties.insert(
            self.properties.completed.clone(),
            json!({ "multi_select": options }),
        );

        let url = format!("{}/pages/{}", self.api_base, item.id);
        let response = self
            .client
            .patch(&url)
            .header(AUTHORIZATION, self.bearer())
            .json(&json!({ "properties": properties }))
            .send()
            .await
            .map_err(SourceError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        tracing::debug!("Saved completion state of page {}", item.id);
        Ok(())
    }
}
