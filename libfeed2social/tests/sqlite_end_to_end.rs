//! End-to-end runs against a SQLite source
//!
//! Verifies that delivery state written by one run survives reopening the
//! database and steers the next run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use libfeed2social::distributor::{DistributionOptions, Distributor};
use libfeed2social::networks::{MockNetwork, NetworkAdapter};
use libfeed2social::source::{SourceRepository, SqliteSource};
use libfeed2social::title::NoopTitleResolver;
use libfeed2social::types::{FeedItem, NetworkKey, RecencyWindow};
use libfeed2social::{Config, PlatformError};
use tempfile::TempDir;

async fn create_test_source() -> Result<(TempDir, String, SqliteSource)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("feed.db");
    let db_path_str = db_path.to_string_lossy().to_string();

    let source = SqliteSource::new(&db_path_str).await?;
    Ok((temp_dir, db_path_str, source))
}

fn distributor(source: SqliteSource, adapters: &[MockNetwork]) -> Distributor {
    let adapters: Vec<Arc<dyn NetworkAdapter>> = adapters
        .iter()
        .map(|mock| Arc::new(mock.clone()) as Arc<dyn NetworkAdapter>)
        .collect();
    Distributor::new(
        Arc::new(source) as Arc<dyn SourceRepository>,
        Arc::new(NoopTitleResolver),
        adapters,
        DistributionOptions {
            recency: RecencyWindow::Within(Duration::from_secs(24 * 3600)),
            resolve_titles: false,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_delivery_state_survives_reopen() -> Result<()> {
    let (_temp_dir, db_path, source) = create_test_source().await?;
    source
        .insert_item(&FeedItem::new("p1", "First", "https://example.com/1"))
        .await?;

    let misskey = MockNetwork::success(NetworkKey::Misskey);
    let bluesky = MockNetwork::failure(
        NetworkKey::Bluesky,
        PlatformError::Validation("text too long".to_string()),
    );
    let report = distributor(source.clone(), &[misskey.clone(), bluesky.clone()])
        .run()
        .await?;
    assert_eq!(report.failures().len(), 1);

    let reopened = SqliteSource::new(&db_path).await?;
    let completed = reopened.completed_networks("p1").await?;
    assert_eq!(completed.into_iter().collect::<Vec<_>>(), vec![NetworkKey::Misskey]);

    // Next run: bluesky recovered, misskey is not asked again
    let bluesky = MockNetwork::success(NetworkKey::Bluesky);
    let report = distributor(reopened.clone(), &[misskey.clone(), bluesky.clone()])
        .run()
        .await?;
    assert!(report.is_clean());
    assert_eq!(misskey.publish_call_count(), 1);
    assert_eq!(bluesky.publish_call_count(), 1);

    let completed = reopened.completed_networks("p1").await?;
    assert!(completed.contains(&NetworkKey::Misskey));
    assert!(completed.contains(&NetworkKey::Bluesky));

    // Third run finds nothing to do
    let report = distributor(reopened, &[misskey.clone(), bluesky.clone()])
        .run()
        .await?;
    assert!(report.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_distributor_from_sqlite_config() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("nested").join("feed.db");
    let config = Config::from_toml(&format!(
        r#"
[source]
kind = "sqlite"

[database]
path = "{}"

[distribution]
recency = "1d"
resolve_titles = false
"#,
        db_path.to_string_lossy()
    ))?;

    let distributor = Distributor::from_config(&config, true).await?;
    assert!(distributor.networks().is_empty());
    assert!(distributor.options().dry_run);

    let report = distributor.run().await?;
    assert!(report.items.is_empty());
    assert!(db_path.exists(), "database file should be created on open");
    Ok(())
}
