//! Topics the session wants to be subscribed to
//!
//! Entries survive reconnects and are replayed in first-registration order
//! every time the session reaches Connected.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A desired subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub desired: bool,
    pub registered_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            desired: true,
            registered_at: Utc::now(),
        }
    }
}

/// Ordered, de-duplicated set of desired subscriptions
///
/// Not synchronized on its own; the session keeps it behind the same lock as
/// the connection state.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    order: Vec<String>,
    entries: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic. Returns false if it was already registered.
    pub fn add(&mut self, topic: &str) -> bool {
        if self.entries.contains_key(topic) {
            return false;
        }
        self.order.push(topic.to_string());
        self.entries.insert(topic.to_string(), Subscription::new(topic));
        true
    }

    /// Forget a topic. Returns false if it was not registered.
    pub fn remove(&mut self, topic: &str) -> bool {
        if self.entries.remove(topic).is_none() {
            return false;
        }
        self.order.retain(|registered| registered != topic);
        true
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn get(&self, topic: &str) -> Option<&Subscription> {
        self.entries.get(topic)
    }

    /// Desired topics in replay order
    pub fn all(&self) -> Vec<String> {
        self.iter()
            .filter(|subscription| subscription.desired)
            .map(|subscription| subscription.topic.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.order.iter().filter_map(|topic| self.entries.get(topic))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
