//! Topic-scoped event bus with bounded per-subscriber delivery.
//!
//! [`EventBus`] is the central hub for progress and state-change events. It
//! is designed to be shared via `Arc<EventBus>` across the application.
//! Delivery is best-effort within the process: publication enqueues into
//! each matching subscriber's bounded channel with `try_send`, so a slow
//! subscriber loses its own messages (tracked per subscriber) without ever
//! stalling the publisher or its peers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-subscriber queue depth. Overflow increments the drop counter.
const SUBSCRIBER_BUFFER: usize = 256;

/// Event topics a subscriber can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Job lifecycle: enqueued, claimed, progress, terminal transitions.
    Queue,
    /// Generated-image record creation.
    Generations,
    /// Engine process state changes.
    Models,
    /// Download progress and terminal transitions.
    Downloads,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Generations => "generations",
            Self::Models => "models",
            Self::Downloads => "downloads",
        }
    }
}

/// A typed message published on the bus.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: Topic,
    /// Dot-separated event name, e.g. `"job.progress"`.
    pub event_type: String,
    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,
    /// When the event was published (UTC).
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event with an empty payload.
    pub fn new(topic: Topic, event_type: impl Into<String>) -> Self {
        Self {
            topic,
            event_type: event_type.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

struct Subscriber {
    topics: HashSet<Topic>,
    sender: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// A live subscription: the receiving half plus the handle needed to change
/// topics or unsubscribe.
pub struct Subscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Number of events this subscriber lost to queue overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Topic-scoped in-process fan-out bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber for a set of topics.
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();
        let dropped = Arc::new(AtomicU64::new(0));

        let subscriber = Subscriber {
            topics: topics.iter().copied().collect(),
            sender: tx,
            dropped: Arc::clone(&dropped),
        };
        self.subscribers
            .write()
            .expect("subscriber table poisoned")
            .insert(id, subscriber);

        Subscription { id, rx, dropped }
    }

    /// Replace a subscriber's topic set. No-op if the subscriber is gone.
    pub fn set_topics(&self, id: Uuid, topics: &[Topic]) {
        if let Some(sub) = self
            .subscribers
            .write()
            .expect("subscriber table poisoned")
            .get_mut(&id)
        {
            sub.topics = topics.iter().copied().collect();
        }
    }

    /// Remove a subscriber. Its receiver drains whatever was already queued
    /// and then sees the channel close; nothing new is delivered.
    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers
            .write()
            .expect("subscriber table poisoned")
            .remove(&id);
    }

    /// Publish an event to every subscriber of its topic.
    ///
    /// Never suspends: full subscriber queues drop the event and count it.
    pub fn publish(&self, event: Event) {
        let subs = self.subscribers.read().expect("subscriber table poisoned");
        for sub in subs.values() {
            if !sub.topics.contains(&event.topic) {
                continue;
            }
            if sub.sender.try_send(event.clone()).is_err() {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("subscriber table poisoned")
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
