//! Event system for distribution progress
//!
//! The distributor emits events on an in-process bus as a run progresses.
//! Anything interested (an error reporter, the CLI's logging) subscribes;
//! with no subscribers events are dropped without blocking the run.
//!
//! # Example
//!
//! ```no_run
//! use libfeed2social::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::RunStarted {
//!     run_id: "run-1".to_string(),
//!     dry_run: false,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::NetworkKey;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing progress events
///
/// Backed by a broadcast channel. Subscribers that fall behind lose the
/// oldest events rather than slowing the emitter down.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers, never blocking
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted during a distribution run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        run_id: String,
        dry_run: bool,
    },

    /// Distribution of one item began
    ItemStarted {
        run_id: String,
        item_id: String,
        /// Networks the item will be published to in this run
        outstanding: Vec<NetworkKey>,
    },

    Delivered {
        run_id: String,
        item_id: String,
        network: NetworkKey,
        remote_id: String,
    },

    DeliveryFailed {
        run_id: String,
        item_id: String,
        network: NetworkKey,
        error: String,
    },

    /// The item's completion set was persisted
    ItemSaved {
        run_id: String,
        item_id: String,
        completed: Vec<NetworkKey>,
    },

    SaveFailed {
        run_id: String,
        item_id: String,
        error: String,
    },

    RunCompleted {
        run_id: String,
        items: usize,
        delivered: usize,
        failures: usize,
    },
}
