//! SQLite-backed source

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::{Result, SourceError};
use crate::source::SourceRepository;
use crate::types::{FeedItem, NetworkKey, PendingFilter};

#[derive(Clone)]
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Open (creating if needed) the database at `db_path` and migrate it
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SourceError::Io)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(SourceError::Database)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(SourceError::Migration)?;

        Ok(Self { pool })
    }

    /// Add an item, along with any deliveries it already has
    pub async fn insert_item(&self, item: &FeedItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, title, url, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.url)
        .bind(item.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(SourceError::Database)?;

        if !item.completed.is_empty() {
            self.save(item).await?;
        }
        Ok(())
    }

    /// Networks recorded as delivered for `item_id`
    pub async fn completed_networks(&self, item_id: &str) -> Result<BTreeSet<NetworkKey>> {
        let rows = sqlx::query("SELECT network FROM deliveries WHERE item_id = ?")
            .bind(item_id)
            .fetch_all(&self.pool)
            .await
            .map_err(SourceError::Database)?;

        Ok(rows
            .iter()
            .filter_map(|row| parse_network(item_id, &row.get::<String, _>("network")))
            .collect())
    }
}

/// Persisted network name to key; names no longer known are skipped
fn parse_network(item_id: &str, name: &str) -> Option<NetworkKey> {
    match name.parse() {
        Ok(key) => Some(key),
        Err(_) => {
            tracing::warn!("Ignoring unknown network '{}' recorded for item {}", name, item_id);
            None
        }
    }
}

#[async_trait]
impl SourceRepository for SqliteSource {
    async fn fetch_pending(&self, filter: &PendingFilter) -> Result<Vec<FeedItem>> {
        if filter.networks.is_empty() {
            return Ok(Vec::new());
        }

        let cutoff = filter.recency.cutoff(Utc::now()).timestamp();
        let placeholders = vec!["?"; filter.networks.len()].join(", ");

        // Items completed on every configured network are excluded in SQL
        let query_str = format!(
            r#"
            SELECT i.id, i.title, i.url, i.created_at
            FROM items i
            WHERE i.created_at >= ?
              AND (? = 0 OR TRIM(i.url) <> '')
              AND (
                  SELECT COUNT(*) FROM deliveries d
                  WHERE d.item_id = i.id AND d.network IN ({})
              ) < ?
            ORDER BY i.created_at DESC, i.id
            "#,
            placeholders
        );

        let mut query = sqlx::query(&query_str)
            .bind(cutoff)
            .bind(filter.require_url);
        for key in &filter.networks {
            query = query.bind(key.as_str());
        }
        query = query.bind(filter.networks.len() as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(SourceError::Database)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let created_at = DateTime::from_timestamp(row.get::<i64, _>("created_at"), 0)
                .ok_or_else(|| SourceError::Decode {
                    item_id: id.clone(),
                    reason: "created_at is out of range".to_string(),
                })?;
            let completed = self.completed_networks(&id).await?;

            items.push(FeedItem {
                title: row.get("title"),
                url: row.get("url"),
                created_at,
                completed,
                id,
            });
        }

        tracing::debug!("Fetched {} pending items from SQLite", items.len());
        Ok(items)
    }

    async fn save(&self, item: &FeedItem) -> Result<()> {
        let delivered_at = Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(SourceError::Database)?;

        for key in &item.completed {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO deliveries (item_id, network, delivered_at)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(key.as_str())
            .bind(delivered_at)
            .execute(&mut *tx)
            .await
            .map_err(SourceError::Database)?;
        }

        tx.commit().await.map_err(SourceError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecencyWindow;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup() -> (SqliteSource, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.db");
        let source = SqliteSource::new(path.to_str().unwrap()).await.unwrap();
        (source, dir)
    }

    fn filter(networks: Vec<NetworkKey>) -> PendingFilter {
        PendingFilter::new(RecencyWindow::Within(Duration::from_secs(24 * 3600)), networks)
    }

    fn item(id: &str, hours_ago: i64) -> FeedItem {
        let mut item = FeedItem::new(id, format!("Title {}", id), format!("https://{}.example", id));
        item.created_at = Utc::now() - chrono::Duration::hours(hours_ago);
        item
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        let result = SqliteSource::new("/tmp/feed2social\0invalid.db").await;
        assert!(result.is_err(), "Expected error for invalid path");
    }

    #[tokio::test]
    async fn test_fetch_orders_newest_first() {
        let (source, _dir) = setup().await;
        source.insert_item(&item("a", 3)).await.unwrap();
        source.insert_item(&item("b", 1)).await.unwrap();
        source.insert_item(&item("c", 2)).await.unwrap();

        let ids: Vec<String> = source
            .fetch_pending(&filter(vec![NetworkKey::Misskey]))
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_fetch_applies_recency_and_url_filter() {
        let (source, _dir) = setup().await;
        source.insert_item(&item("recent", 1)).await.unwrap();
        source.insert_item(&item("stale", 48)).await.unwrap();
        let mut no_url = item("no-url", 1);
        no_url.url = " ".to_string();
        source.insert_item(&no_url).await.unwrap();

        let pending = source
            .fetch_pending(&filter(vec![NetworkKey::Misskey]))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "recent");
        assert_eq!(pending[0].title, "Title recent");
    }

    #[tokio::test]
    async fn test_fetch_excludes_fully_completed_items() {
        let (source, _dir) = setup().await;
        let mut partial = item("partial", 1);
        partial.mark_completed(NetworkKey::Misskey);
        let mut complete = item("complete", 1);
        complete.mark_completed(NetworkKey::Misskey);
        complete.mark_completed(NetworkKey::Bluesky);
        source.insert_item(&partial).await.unwrap();
        source.insert_item(&complete).await.unwrap();

        let pending = source
            .fetch_pending(&filter(vec![NetworkKey::Misskey, NetworkKey::Bluesky]))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "partial");
        assert_eq!(
            pending[0].completed,
            BTreeSet::from([NetworkKey::Misskey])
        );

        // Completed on every configured network once Twitter is dropped
        let pending = source
            .fetch_pending(&filter(vec![NetworkKey::Misskey]))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_with_no_networks_is_empty() {
        let (source, _dir) = setup().await;
        source.insert_item(&item("a", 1)).await.unwrap();
        assert!(source.fetch_pending(&filter(vec![])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_is_idempotent_and_monotonic() {
        let (source, _dir) = setup().await;
        let mut stored = item("p1", 1);
        source.insert_item(&stored).await.unwrap();

        stored.mark_completed(NetworkKey::Misskey);
        source.save(&stored).await.unwrap();
        source.save(&stored).await.unwrap();

        // A copy that lost track of misskey must not erase it
        let mut stale = item("p1", 1);
        stale.mark_completed(NetworkKey::Twitter);
        source.save(&stale).await.unwrap();

        assert_eq!(
            source.completed_networks("p1").await.unwrap(),
            BTreeSet::from([NetworkKey::Misskey, NetworkKey::Twitter])
        );
    }

    #[tokio::test]
    async fn test_save_unknown_item_fails() {
        let (source, _dir) = setup().await;
        let mut ghost = item("ghost", 1);
        ghost.mark_completed(NetworkKey::Misskey);

        assert!(source.save(&ghost).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_network_rows_are_ignored() {
        let (source, _dir) = setup().await;
        source.insert_item(&item("p1", 1)).await.unwrap();
        sqlx::query("INSERT INTO deliveries (item_id, network, delivered_at) VALUES ('p1', 'myspace', 0)")
            .execute(&source.pool)
            .await
            .unwrap();

        assert!(source.completed_networks("p1").await.unwrap().is_empty());
        let pending = source
            .fetch_pending(&filter(vec![NetworkKey::Misskey]))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.db");
        let path = path.to_str().unwrap();

        {
            let source = SqliteSource::new(path).await.unwrap();
            let mut stored = item("p1", 1);
            stored.mark_completed(NetworkKey::Bluesky);
            source.insert_item(&stored).await.unwrap();
        }

        let reopened = SqliteSource::new(path).await.unwrap();
        assert_eq!(
            reopened.completed_networks("p1").await.unwrap(),
            BTreeSet::from([NetworkKey::Bluesky])
        );
    }
}
