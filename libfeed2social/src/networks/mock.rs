//! Mock network adapter for testing
//!
//! A configurable adapter that can succeed, fail, fail a few times before
//! succeeding, or stall. It records every publish so tests can verify how
//! the distributor fanned out without real credentials or network access.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::networks::NetworkAdapter;
use crate::types::{NetworkKey, PostContent};

/// Shared, ordered log of events across mocks and test repositories
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub key: NetworkKey,

    /// Error returned by every publish, after `failures_before_success`
    /// runs out if that is set
    pub error: Option<PlatformError>,

    /// Fail only this many leading calls, then succeed
    pub failures_before_success: Option<usize>,

    /// Delay before completing a publish (simulates network latency)
    pub delay: Duration,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Posts that were published successfully
    pub published: Arc<Mutex<Vec<PostContent>>>,

    /// Receives `publish:start:{key}` and `publish:end:{key}` entries
    pub event_log: Option<EventLog>,
}

impl MockConfig {
    pub fn new(key: NetworkKey) -> Self {
        Self {
            key,
            error: None,
            failures_before_success: None,
            delay: Duration::from_millis(0),
            publish_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
            event_log: None,
        }
    }
}

/// Mock adapter for testing
#[derive(Debug, Clone)]
pub struct MockNetwork {
    config: MockConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockNetwork {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// An adapter that always succeeds
    pub fn success(key: NetworkKey) -> Self {
        Self::new(MockConfig::new(key))
    }

    /// An adapter that always fails with `error`
    pub fn failure(key: NetworkKey, error: PlatformError) -> Self {
        Self::new(MockConfig {
            error: Some(error),
            ..MockConfig::new(key)
        })
    }

    /// An adapter that fails `times` times with `error`, then succeeds
    pub fn flaky(key: NetworkKey, times: usize, error: PlatformError) -> Self {
        Self::new(MockConfig {
            error: Some(error),
            failures_before_success: Some(times),
            ..MockConfig::new(key)
        })
    }

    /// An adapter that succeeds after `delay`
    pub fn with_delay(key: NetworkKey, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(key)
        })
    }

    /// Record publish start and end in `log`
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.config.event_log = Some(log);
        self
    }

    /// Get the number of times publish was called
    pub fn publish_call_count(&self) -> usize {
        *lock(&self.config.publish_call_count)
    }

    /// Get all posts that were published successfully
    pub fn published(&self) -> Vec<PostContent> {
        lock(&self.config.published).clone()
    }

    fn log(&self, event: &str) {
        if let Some(log) = &self.config.event_log {
            lock(log).push(format!("{}:{}", event, self.config.key));
        }
    }

    fn next_result(&self, call: usize) -> std::result::Result<(), PlatformError> {
        match (&self.config.error, self.config.failures_before_success) {
            (None, _) => Ok(()),
            (Some(_), Some(times)) if call > times => Ok(()),
            (Some(error), _) => Err(error.clone()),
        }
    }
}

#[async_trait]
impl NetworkAdapter for MockNetwork {
    fn key(&self) -> NetworkKey {
        self.config.key
    }

    async fn publish(&self, post: &PostContent) -> Result<String> {
        let call = {
            let mut count = lock(&self.config.publish_call_count);
            *count += 1;
            *count
        };
        self.log("publish:start");

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        let result = self.next_result(call);
        self.log("publish:end");

        result?;
        lock(&self.config.published).push(post.clone());
        Ok(format!("{}:mock-{}", self.config.key, uuid::Uuid::new_v4()))
    }
}
