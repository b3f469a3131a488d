//! Fast-track notifications.
//!
//! Workers publish small payloads straight to local subscribers, keyed by a
//! `(kind, args)` pair. Topics are reference counted: the first subscriber
//! creates one, and dropping the last [`FastTrackSubscription`] removes it.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered messages per topic before slow subscribers start lagging.
const TOPIC_BUFFER: usize = 64;

/// Identity of a fast-track topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    /// Notification kind, e.g. `"timeline"`.
    pub kind: String,
    /// Arguments narrowing the kind, e.g. a studio name.
    pub args: Vec<String>,
}

impl TopicKey {
    /// Build a key from a kind and its arguments.
    pub fn new(kind: &str, args: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for arg in &self.args {
            write!(f, ":{arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Topic {
    sender: broadcast::Sender<Value>,
    subscribers: usize,
}

/// Registry of live fast-track topics.
#[derive(Debug, Clone, Default)]
pub struct FastTrackHub {
    topics: Arc<DashMap<TopicKey, Topic>>,
}

impl FastTrackHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `(kind, args)`, creating the topic if needed.
    pub fn subscribe(&self, kind: &str, args: &[&str]) -> FastTrackSubscription {
        let key = TopicKey::new(kind, args);
        let receiver = {
            let mut topic = self.topics.entry(key.clone()).or_insert_with(|| Topic {
                sender: broadcast::channel(TOPIC_BUFFER).0,
                subscribers: 0,
            });
            topic.subscribers += 1;
            topic.sender.subscribe()
        };

        tracing::debug!("Subscribed to fast-track topic '{}'", key);
        FastTrackSubscription {
            key,
            receiver,
            topics: Arc::clone(&self.topics),
        }
    }

    /// Deliver `payload` to every subscriber of `(kind, args)`.
    ///
    /// Returns how many subscribers received it. A topic without
    /// subscribers does not exist, so notifying it is a no-op.
    pub fn publish(&self, kind: &str, args: &[&str], payload: Value) -> usize {
        let key = TopicKey::new(kind, args);
        match self.topics.get(&key) {
            Some(topic) => topic.sender.send(payload).unwrap_or(0),
            None => {
                tracing::trace!("No subscribers for fast-track topic '{}'", key);
                0
            }
        }
    }

    /// Number of live topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of subscribers on `(kind, args)`.
    pub fn subscriber_count(&self, kind: &str, args: &[&str]) -> usize {
        self.topics
            .get(&TopicKey::new(kind, args))
            .map(|t| t.subscribers)
            .unwrap_or(0)
    }
}

/// A live subscription. Dropping it disposes the subscription.
pub struct FastTrackSubscription {
    key: TopicKey,
    receiver: broadcast::Receiver<Value>,
    topics: Arc<DashMap<TopicKey, Topic>>,
}

impl fmt::Debug for FastTrackSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastTrackSubscription")
            .field("key", &self.key)
            .finish()
    }
}

impl FastTrackSubscription {
    /// Topic this subscription listens on.
    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    /// Wait for the next payload.
    ///
    /// Payloads dropped because this subscriber lagged are skipped.
    /// Returns `None` only if the topic's sender is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Fast-track subscriber on '{}' skipped {} messages",
                        self.key,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take a payload if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Explicitly end the subscription.
    pub fn dispose(self) {}
}

impl Drop for FastTrackSubscription {
    fn drop(&mut self) {
        if let Some(mut topic) = self.topics.get_mut(&self.key) {
            topic.subscribers = topic.subscribers.saturating_sub(1);
        }
        if self
            .topics
            .remove_if(&self.key, |_, topic| topic.subscribers == 0)
            .is_some()
        {
            tracing::debug!("Removed fast-track topic '{}'", self.key);
        }
    }
}
