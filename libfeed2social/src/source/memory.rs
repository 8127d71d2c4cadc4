//! In-memory source
//!
//! Holds items in a vector and applies [`PendingFilter`] on the client
//! side. Used by tests and dry runs against fixture data; it records every
//! save so callers can check what was persisted and when.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, SourceError};
use crate::networks::mock::EventLog;
use crate::source::SourceRepository;
use crate::types::{FeedItem, PendingFilter};

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    items: Arc<Mutex<Vec<FeedItem>>>,
    saves: Arc<Mutex<Vec<FeedItem>>>,
    fetch_error: Option<String>,
    failing_saves: Arc<Mutex<Vec<String>>>,
    event_log: Option<EventLog>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySource {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items)),
            ..Default::default()
        }
    }

    /// Every fetch fails with `message`
    pub fn with_fetch_error(mut self, message: &str) -> Self {
        self.fetch_error = Some(message.to_string());
        self
    }

    /// Saving the item with `item_id` fails
    pub fn with_failing_save(self, item_id: &str) -> Self {
        lock(&self.failing_saves).push(item_id.to_string());
        self
    }

    /// Record `save:{item_id}` in `log` on every save
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.event_log = Some(log);
        self
    }

    /// Current state of every item
    pub fn items(&self) -> Vec<FeedItem> {
        lock(&self.items).clone()
    }

    pub fn item(&self, id: &str) -> Option<FeedItem> {
        lock(&self.items).iter().find(|item| item.id == id).cloned()
    }

    /// Items as they were passed to `save`, in call order
    pub fn saves(&self) -> Vec<FeedItem> {
        lock(&self.saves).clone()
    }
}

#[async_trait]
impl SourceRepository for MemorySource {
    async fn fetch_pending(&self, filter: &PendingFilter) -> Result<Vec<FeedItem>> {
        if let Some(message) = &self.fetch_error {
            return Err(SourceError::Http(message.clone()).into());
        }

        let now = Utc::now();
        let mut pending: Vec<FeedItem> = lock(&self.items)
            .iter()
            .filter(|item| filter.matches(item, now))
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn save(&self, item: &FeedItem) -> Result<()> {
        if let Some(log) = &self.event_log {
            lock(log).push(format!("save:{}", item.id));
        }
        lock(&self.saves).push(item.clone());

        if lock(&self.failing_saves).contains(&item.id) {
            return Err(SourceError::Api {
                status: 503,
                message: format!("save of {} rejected", item.id),
            }
            .into());
        }

        let mut items = lock(&self.items);
        match items.iter_mut().find(|stored| stored.id == item.id) {
            Some(stored) => {
                // Union, so a stale copy never drops recorded deliveries
                stored.completed.extend(item.completed.iter().copied());
                stored.title = item.title.clone();
            }
            None => items.push(item.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NetworkKey, RecencyWindow};
    use std::time::Duration;

    fn filter() -> PendingFilter {
        PendingFilter::new(
            RecencyWindow::Within(Duration::from_secs(24 * 3600)),
            vec![NetworkKey::Misskey, NetworkKey::Bluesky],
        )
    }

    #[tokio::test]
    async fn test_fetch_orders_newest_first_and_filters() {
        let mut older = FeedItem::new("older", "A", "https://a");
        older.created_at = Utc::now() - chrono::Duration::hours(2);
        let newer = FeedItem::new("newer", "B", "https://b");
        let mut done = FeedItem::new("done", "C", "https://c");
        done.mark_completed(NetworkKey::Misskey);
        done.mark_completed(NetworkKey::Bluesky);
        let no_url = FeedItem::new("no-url", "D", "");

        let source = MemorySource::new(vec![older, newer, done, no_url]);
        let ids: Vec<String> = source
            .fetch_pending(&filter())
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn test_save_never_shrinks_completion_set() {
        let mut item = FeedItem::new("p1", "A", "https://a");
        item.mark_completed(NetworkKey::Misskey);
        let source = MemorySource::new(vec![item]);

        let mut stale = FeedItem::new("p1", "A", "https://a");
        stale.mark_completed(NetworkKey::Bluesky);
        source.save(&stale).await.unwrap();

        let stored = source.item("p1").unwrap();
        assert!(stored.completed.contains(&NetworkKey::Misskey));
        assert!(stored.completed.contains(&NetworkKey::Bluesky));
        assert_eq!(source.saves().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let source = MemorySource::new(vec![]).with_fetch_error("unreachable");
        assert!(source.fetch_pending(&filter()).await.is_err());

        let source = MemorySource::new(vec![]).with_failing_save("p1");
        let item = FeedItem::new("p1", "A", "https://a");
        assert!(source.save(&item).await.is_err());
        assert!(source.item("p1").is_none());
    }
}
