//! feed2social - distribute feed items to social networks
//!
//! Pending items are read from a source repository (a Notion database or
//! a local SQLite file), composed into a short post, published to every
//! enabled network that has not received the item yet, and written back
//! with their completion set extended by the networks that succeeded.

pub mod composer;
pub mod config;
pub mod distributor;
pub mod encoding;
pub mod error;
pub mod events;
pub mod logging;
pub mod networks;
pub mod source;
pub mod title;
pub mod types;

#[cfg(test)]
mod test_server;

// Re-export commonly used types
pub use config::Config;
pub use distributor::{DeliveryOutcome, DistributionOptions, Distributor, ItemReport, RunReport};
pub use error::{Feed2SocialError, PlatformError, Result, SourceError};
pub use events::{Event, EventBus};
pub use networks::NetworkAdapter;
pub use source::SourceRepository;
pub use title::TitleResolver;
pub use types::{FeedItem, NetworkKey, PendingFilter, PostContent, RecencyWindow};
