//! Topic registry — topic name → set of subscriber usernames.
//!
//! Purely in-memory; the persisted group rosters live in parley-store. A
//! topic key exists exactly as long as its subscriber set is non-empty.

use std::collections::HashSet;

use dashmap::DashMap;

#[derive(Default)]
pub struct TopicRegistry {
    topics: DashMap<String, HashSet<String>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, creating the topic if needed. Idempotent.
    pub fn subscribe(&self, topic: &str, username: &str) {
        self.topics
            .entry(topic.to_owned())
            .or_default()
            .insert(username.to_owned());
    }

    /// Remove a subscriber; drops the topic when its set empties.
    /// Unsubscribing a non-subscriber is a no-op.
    pub fn unsubscribe(&self, topic: &str, username: &str) {
        let mut emptied = false;
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(username);
            emptied = subscribers.is_empty();
        }
        if emptied {
            self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
    }

    /// Session teardown: strip the user from every topic and collect empties.
    pub fn remove_user_everywhere(&self, username: &str) {
        self.topics.retain(|_, subscribers| {
            subscribers.remove(username);
            !subscribers.is_empty()
        });
    }

    /// Snapshot of a topic's subscribers; stable during fan-out.
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &str, username: &str) -> bool {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.contains(username))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
