//! Core types for feed2social

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Feed2SocialError, Result};

/// Identity of a social network
///
/// The string form is persisted in each item's completion set, so it must
/// never change once items have been delivered under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKey {
    Misskey,
    Bluesky,
    Twitter,
}

impl NetworkKey {
    /// Every known network, in configuration order
    pub const ALL: [NetworkKey; 3] = [NetworkKey::Misskey, NetworkKey::Bluesky, NetworkKey::Twitter];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKey::Misskey => "misskey",
            NetworkKey::Bluesky => "bluesky",
            NetworkKey::Twitter => "twitter",
        }
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKey {
    type Err = Feed2SocialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "misskey" => Ok(NetworkKey::Misskey),
            "bluesky" => Ok(NetworkKey::Bluesky),
            "twitter" => Ok(NetworkKey::Twitter),
            other => Err(Feed2SocialError::InvalidInput(format!(
                "Unknown network '{}'. Valid options: misskey, bluesky, twitter",
                other
            ))),
        }
    }
}

/// One unit of content pending distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Stable identifier in the content source
    pub id: String,
    /// Title as stored in the content source
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Networks this item has already been delivered to
    pub completed: BTreeSet<NetworkKey>,
}

impl FeedItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            created_at: Utc::now(),
            completed: BTreeSet::new(),
        }
    }

    /// Networks from `networks` this item still has to be delivered to,
    /// in the order given
    pub fn outstanding(&self, networks: &[NetworkKey]) -> Vec<NetworkKey> {
        networks
            .iter()
            .copied()
            .filter(|key| !self.completed.contains(key))
            .collect()
    }

    /// Record a delivery. The completion set only ever grows.
    pub fn mark_completed(&mut self, key: NetworkKey) {
        self.completed.insert(key);
    }

    pub fn is_complete(&self, networks: &[NetworkKey]) -> bool {
        networks.iter().all(|key| self.completed.contains(key))
    }
}

/// A composed post, ready to be rendered by each network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostContent {
    pub title: String,
    pub url: String,
    /// Source title, shown when it differs from the page's own title
    pub note: Option<String>,
}

/// How far back the source is searched for new items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecencyWindow {
    /// Items created since Monday 00:00 UTC of the current week
    #[default]
    ThisWeek,
    /// Items created within the given duration
    Within(Duration),
}

impl RecencyWindow {
    /// The earliest creation time an eligible item may have
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            RecencyWindow::ThisWeek => {
                let days_since_monday = now.weekday().num_days_from_monday() as i64;
                let monday = now.date_naive() - chrono::Duration::days(days_since_monday);
                monday.and_time(NaiveTime::MIN).and_utc()
            }
            RecencyWindow::Within(window) => {
                chrono::Duration::from_std(*window)
                    .ok()
                    .and_then(|window| now.checked_sub_signed(window))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
        }
    }
}

impl FromStr for RecencyWindow {
    type Err = Feed2SocialError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("this_week") {
            return Ok(RecencyWindow::ThisWeek);
        }
        humantime::parse_duration(trimmed)
            .map(RecencyWindow::Within)
            .map_err(|e| {
                Feed2SocialError::InvalidInput(format!(
                    "Invalid recency window '{}': expected 'this_week' or a duration like '7d' ({})",
                    s, e
                ))
            })
    }
}

impl fmt::Display for RecencyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecencyWindow::ThisWeek => f.write_str("this_week"),
            RecencyWindow::Within(window) => write!(f, "{}", humantime::format_duration(*window)),
        }
    }
}

/// Which items the source should hand out for distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFilter {
    pub recency: RecencyWindow,
    /// Skip items whose link is empty
    pub require_url: bool,
    /// Configured networks; an item completed on all of them is excluded
    pub networks: Vec<NetworkKey>,
}

impl PendingFilter {
    pub fn new(recency: RecencyWindow, networks: Vec<NetworkKey>) -> Self {
        Self {
            recency,
            require_url: true,
            networks,
        }
    }

    /// Client-side evaluation of the filter, used to double check what a
    /// source returned
    pub fn matches(&self, item: &FeedItem, now: DateTime<Utc>) -> bool {
        if self.require_url && item.url.trim().is_empty() {
            return false;
        }
        if item.created_at < self.recency.cutoff(now) {
            return false;
        }
        !item.is_complete(&self.networks)
    }
}
