//! Content sources
//!
//! A source hands out the items that still have networks to be delivered
//! to, and stores each item's completion set after a distribution pass.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, SourceKind};
use crate::error::{ConfigError, Result};
use crate::types::{FeedItem, PendingFilter};

pub mod memory;
pub mod notion;
pub mod sqlite;

pub use memory::MemorySource;
pub use notion::NotionSource;
pub use sqlite::SqliteSource;

/// Where items come from and where their delivery state is kept
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Items matching `filter`, most recently created first
    ///
    /// # Errors
    ///
    /// Any failure to reach the source or decode its records fails the
    /// whole fetch; no partial list is returned.
    async fn fetch_pending(&self, filter: &PendingFilter) -> Result<Vec<FeedItem>>;

    /// Persist the item's completion set
    ///
    /// Saving is idempotent and never removes a network that was
    /// previously recorded as completed.
    async fn save(&self, item: &FeedItem) -> Result<()>;
}

/// Open the source selected by `[source] kind`
pub async fn create_source(config: &Config) -> Result<Arc<dyn SourceRepository>> {
    match config.source.kind {
        SourceKind::Notion => {
            let notion = config
                .notion
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField("notion".to_string()))?;
            Ok(Arc::new(NotionSource::from_config(notion)?))
        }
        SourceKind::Sqlite => {
            let database = config
                .database
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField("database".to_string()))?;
            Ok(Arc::new(SqliteSource::new(&database.path).await?))
        }
    }
}
