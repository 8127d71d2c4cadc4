//! Distribution orchestration
//!
//! One run of the [`Distributor`] fetches the pending items from the
//! source and handles them one at a time:
//!
//! 1. resolve the page title and compose the post,
//! 2. publish to every network the item has not reached yet, concurrently,
//! 3. add the networks that succeeded to the item's completion set,
//! 4. save the item, exactly once, after every publish has settled.
//!
//! A failing network never stops its siblings, the item, or the run; it
//! only shows up in the [`RunReport`]. Only a failed fetch fails the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::composer::compose;
use crate::config::Config;
use crate::error::{Feed2SocialError, PlatformError, Result};
use crate::events::{Event, EventBus};
use crate::networks::{create_adapters, NetworkAdapter};
use crate::source::{create_source, SourceRepository};
use crate::title::{HttpTitleResolver, NoopTitleResolver, TitleResolver};
use crate::types::{FeedItem, NetworkKey, PendingFilter, PostContent, RecencyWindow};

/// What happened to one (item, network) pair in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { remote_id: String },
    Failed { error: String },
    /// Delivered in an earlier run; not published again
    AlreadyCompleted,
    /// Dry run: would have been published
    Planned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_id: String,
    pub url: String,
    /// The composed post; absent when nothing was outstanding
    pub post: Option<PostContent>,
    pub outcomes: BTreeMap<NetworkKey, DeliveryOutcome>,
    /// Completion set after the run
    pub completed: BTreeSet<NetworkKey>,
    pub save_error: Option<String>,
}

/// One failure in a run: a delivery, or a save when `network` is `None`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub item_id: String,
    pub network: Option<NetworkKey>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    /// Every delivery and save failure, in processing order
    pub fn failures(&self) -> Vec<Failure> {
        let mut failures = Vec::new();
        for item in &self.items {
            for (network, outcome) in &item.outcomes {
                if let DeliveryOutcome::Failed { error } = outcome {
                    failures.push(Failure {
                        item_id: item.item_id.clone(),
                        network: Some(*network),
                        error: error.clone(),
                    });
                }
            }
            if let Some(error) = &item.save_error {
                failures.push(Failure {
                    item_id: item.item_id.clone(),
                    network: None,
                    error: error.clone(),
                });
            }
        }
        failures
    }

    pub fn delivered_count(&self) -> usize {
        self.items
            .iter()
            .flat_map(|item| item.outcomes.values())
            .filter(|outcome| matches!(outcome, DeliveryOutcome::Delivered { .. }))
            .count()
    }

    /// True when nothing failed
    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(
            f,
            "Run {}{}: {} items, {} delivered, {} failures",
            self.run_id,
            mode,
            self.items.len(),
            self.delivered_count(),
            self.failures().len()
        )?;

        for item in &self.items {
            writeln!(f, "  {} {}", item.item_id, item.url)?;
            for (network, outcome) in &item.outcomes {
                match outcome {
                    DeliveryOutcome::Delivered { remote_id } => {
                        writeln!(f, "    {}: delivered {}", network, remote_id)?
                    }
                    DeliveryOutcome::Failed { error } => {
                        writeln!(f, "    {}: failed: {}", network, error)?
                    }
                    DeliveryOutcome::AlreadyCompleted => {
                        writeln!(f, "    {}: already delivered", network)?
                    }
                    DeliveryOutcome::Planned => writeln!(f, "    {}: planned", network)?,
                }
            }
            if let Some(error) = &item.save_error {
                writeln!(f, "    save failed: {}", error)?;
            }
        }
        Ok(())
    }
}

/// Tunables of a distribution run
#[derive(Debug, Clone)]
pub struct DistributionOptions {
    pub recency: RecencyWindow,
    /// Upper bound on a single publish call
    pub publish_timeout: Duration,
    /// Attempts per network per run; only transient failures are retried
    pub max_attempts: u32,
    /// First retry delay, doubled on every further attempt
    pub retry_base_delay: Duration,
    pub resolve_titles: bool,
    /// Log the plan without publishing or saving
    pub dry_run: bool,
}

impl Default for DistributionOptions {
    fn default() -> Self {
        Self {
            recency: RecencyWindow::ThisWeek,
            publish_timeout: Duration::from_secs(30),
            max_attempts: 1,
            retry_base_delay: Duration::from_secs(1),
            resolve_titles: true,
            dry_run: false,
        }
    }
}

impl DistributionOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            recency: config.recency()?,
            publish_timeout: config.publish_timeout()?,
            max_attempts: config.distribution.max_attempts,
            resolve_titles: config.distribution.resolve_titles,
            ..Default::default()
        })
    }
}

pub struct Distributor {
    source: Arc<dyn SourceRepository>,
    resolver: Arc<dyn TitleResolver>,
    adapters: Vec<Arc<dyn NetworkAdapter>>,
    options: DistributionOptions,
    events: EventBus,
}

impl Distributor {
    pub fn new(
        source: Arc<dyn SourceRepository>,
        resolver: Arc<dyn TitleResolver>,
        adapters: Vec<Arc<dyn NetworkAdapter>>,
        options: DistributionOptions,
    ) -> Self {
        Self {
            source,
            resolver,
            adapters,
            options,
            events: EventBus::default(),
        }
    }

    /// Build the source, title resolver and adapters described by `config`
    pub async fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let options = DistributionOptions {
            dry_run,
            ..DistributionOptions::from_config(config)?
        };

        let source = create_source(config).await?;
        let adapters = create_adapters(config)?;
        let resolver: Arc<dyn TitleResolver> = if options.resolve_titles {
            Arc::new(HttpTitleResolver::new(
                &config.distribution.user_agent,
                options.publish_timeout,
            )?)
        } else {
            Arc::new(NoopTitleResolver)
        };

        if adapters.is_empty() {
            warn!("No networks are enabled; runs will not publish anything");
        }

        Ok(Self::new(source, resolver, adapters, options))
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn options(&self) -> &DistributionOptions {
        &self.options
    }

    /// Keys of the configured adapters, in configuration order
    pub fn networks(&self) -> Vec<NetworkKey> {
        self.adapters.iter().map(|adapter| adapter.key()).collect()
    }

    /// The fetch filter for the configured networks
    pub fn filter(&self) -> PendingFilter {
        PendingFilter::new(self.options.recency, self.networks())
    }

    /// Run one distribution pass
    ///
    /// # Errors
    ///
    /// Only a failed fetch is an error. Delivery and save failures are
    /// reported in the returned [`RunReport`].
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let dry_run = self.options.dry_run;

        info!("Starting distribution run {}{}", run_id, if dry_run { " (dry run)" } else { "" });
        self.events.emit(Event::RunStarted {
            run_id: run_id.clone(),
            dry_run,
        });

        let items = self.source.fetch_pending(&self.filter()).await?;
        info!("Fetched {} pending items", items.len());

        // Items are handled strictly one after another
        let mut reports = Vec::with_capacity(items.len());
        for item in items {
            reports.push(self.distribute_item(&run_id, item).await);
        }

        let report = RunReport {
            run_id: run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            dry_run,
            items: reports,
        };

        let failures = report.failures().len();
        self.events.emit(Event::RunCompleted {
            run_id,
            items: report.items.len(),
            delivered: report.delivered_count(),
            failures,
        });
        info!(
            "Run finished: {} items, {} delivered, {} failures",
            report.items.len(),
            report.delivered_count(),
            failures
        );

        Ok(report)
    }

    async fn distribute_item(&self, run_id: &str, mut item: FeedItem) -> ItemReport {
        let networks = self.networks();
        let outstanding = item.outstanding(&networks);

        let mut outcomes: BTreeMap<NetworkKey, DeliveryOutcome> = networks
            .iter()
            .filter(|key| item.completed.contains(key))
            .map(|key| (*key, DeliveryOutcome::AlreadyCompleted))
            .collect();

        let mut report = ItemReport {
            item_id: item.id.clone(),
            url: item.url.clone(),
            post: None,
            outcomes: BTreeMap::new(),
            completed: item.completed.clone(),
            save_error: None,
        };

        if outstanding.is_empty() {
            debug!("Item {} has no outstanding networks", item.id);
            report.outcomes = outcomes;
            return report;
        }

        self.events.emit(Event::ItemStarted {
            run_id: run_id.to_string(),
            item_id: item.id.clone(),
            outstanding: outstanding.clone(),
        });

        let resolved_title = if self.options.resolve_titles {
            self.resolver.resolve(&item.url).await
        } else {
            String::new()
        };
        let post = compose(&item, &resolved_title);

        let targets: Vec<&Arc<dyn NetworkAdapter>> = self
            .adapters
            .iter()
            .filter(|adapter| outstanding.contains(&adapter.key()))
            .collect();

        if self.options.dry_run {
            for adapter in targets {
                info!(
                    "Dry run: would publish item {} to {}: {}",
                    item.id,
                    adapter.key(),
                    adapter.render(&post)
                );
                outcomes.insert(adapter.key(), DeliveryOutcome::Planned);
            }
            report.post = Some(post);
            report.outcomes = outcomes;
            return report;
        }

        info!("Publishing item {} to {} networks", item.id, targets.len());
        let results = join_all(
            targets
                .iter()
                .map(|adapter| self.publish_with_retry(Arc::as_ref(adapter), &post)),
        )
        .await;

        for (network, result) in results {
            match result {
                Ok(remote_id) => {
                    info!("Delivered item {} to {}: {}", item.id, network, remote_id);
                    item.mark_completed(network);
                    self.events.emit(Event::Delivered {
                        run_id: run_id.to_string(),
                        item_id: item.id.clone(),
                        network,
                        remote_id: remote_id.clone(),
                    });
                    outcomes.insert(network, DeliveryOutcome::Delivered { remote_id });
                }
                Err(e) => {
                    warn!("Failed to deliver item {} to {}: {}", item.id, network, e);
                    self.events.emit(Event::DeliveryFailed {
                        run_id: run_id.to_string(),
                        item_id: item.id.clone(),
                        network,
                        error: e.to_string(),
                    });
                    outcomes.insert(
                        network,
                        DeliveryOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        // Every publish has settled; persist whatever succeeded
        match self.source.save(&item).await {
            Ok(()) => {
                debug!("Saved item {}", item.id);
                self.events.emit(Event::ItemSaved {
                    run_id: run_id.to_string(),
                    item_id: item.id.clone(),
                    completed: item.completed.iter().copied().collect(),
                });
            }
            Err(e) => {
                error!("Failed to save item {}: {}", item.id, e);
                self.events.emit(Event::SaveFailed {
                    run_id: run_id.to_string(),
                    item_id: item.id.clone(),
                    error: e.to_string(),
                });
                report.save_error = Some(e.to_string());
            }
        }

        report.post = Some(post);
        report.outcomes = outcomes;
        report.completed = item.completed;
        report
    }

    /// Publish with a per-attempt timeout, retrying transient failures
    ///
    /// Never returns early on a sibling's behalf: the result, success or
    /// failure, is a value for the caller to reconcile.
    async fn publish_with_retry(
        &self,
        adapter: &dyn NetworkAdapter,
        post: &PostContent,
    ) -> (NetworkKey, std::result::Result<String, PlatformError>) {
        let network = adapter.key();
        let max_attempts = self.options.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = match timeout(self.options.publish_timeout, adapter.publish(post)).await {
                Ok(Ok(remote_id)) => Ok(remote_id),
                Ok(Err(e)) => Err(into_platform_error(e)),
                Err(_) => Err(PlatformError::Timeout(format!(
                    "{} did not respond within {}",
                    network,
                    humantime::format_duration(self.options.publish_timeout)
                ))),
            };

            match result {
                Ok(remote_id) => {
                    if attempt > 1 {
                        info!("Published to {} on attempt {}", network, attempt);
                    }
                    return (network, Ok(remote_id));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff_delay(self.options.retry_base_delay, attempt);
                    warn!(
                        "Transient error publishing to {} (attempt {}/{}): {}. Retrying in {:?}",
                        network, attempt, max_attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return (network, Err(e)),
            }
        }

        (
            network,
            Err(PlatformError::Posting(format!(
                "Failed to publish to {} after {} attempts",
                network, max_attempts
            ))),
        )
    }
}

fn into_platform_error(error: Feed2SocialError) -> PlatformError {
    match error {
        Feed2SocialError::Platform(e) => e,
        other => PlatformError::Posting(other.to_string()),
    }
}

/// `base * 2^(attempt - 1)` plus up to a quarter of `base` of jitter
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter_ms = (base.as_millis() / 4) as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    exponential + Duration::from_millis(jitter)
}
