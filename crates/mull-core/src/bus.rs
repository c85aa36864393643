//! Topic-based publish/subscribe for cross-agent notification.
//!
//! Independent of any Executor. Delivery is at-most-once per subscriber that
//! is registered at publish time; nothing is persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A payload published on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    /// Publishing agent.
    pub source: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// A broadcast-per-topic event bus.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<DashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish to every current subscriber of `topic`. Returns how many
    /// subscribers the message was handed to.
    pub fn publish(&self, topic: &str, source: &str, payload: Value) -> usize {
        let message = BusMessage {
            topic: topic.to_string(),
            source: source.to_string(),
            payload,
            published_at: Utc::now(),
        };
        let delivered = match self.topics.get(topic) {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            // Drop topics whose subscribers have all gone away.
            self.topics
                .remove_if(topic, |_, sender| sender.receiver_count() == 0);
        }
        debug!(topic, source, delivered, "bus publish");
        delivered
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let receiver = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            topic: topic.to_string(),
            receiver,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A live registration on one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message. Messages lost to lag are skipped, not
    /// redelivered. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
