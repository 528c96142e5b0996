//! Subscription registry: at most one live subscription per destination.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

/// A registered subscription: the id used in SUBSCRIBE frames plus the
/// channel that delivers parsed message bodies to the subscriber.
pub struct SubscriptionEntry {
    pub id: u64,
    pub tx: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a subscription for `destination`. Returns the entry it
    /// displaced, if any — the caller must cancel that one server-side to
    /// keep the one-subscription-per-destination invariant.
    pub fn insert(&self, destination: &str, entry: SubscriptionEntry) -> Option<SubscriptionEntry> {
        self.entries.insert(destination.to_string(), entry)
    }

    /// Remove the entry for `destination`, but only while it still holds
    /// the given subscription id. A stale handle left over from a
    /// displaced subscription must not remove its successor.
    pub fn remove(&self, destination: &str, id: u64) -> Option<SubscriptionEntry> {
        self.entries
            .remove_if(destination, |_, entry| entry.id == id)
            .map(|(_, entry)| entry)
    }

    /// Deliver a parsed body to the subscriber for `destination`. Returns
    /// false when no subscription exists or its receiver is gone.
    pub fn deliver(&self, destination: &str, body: Value) -> bool {
        match self.entries.get(destination) {
            Some(entry) => entry.tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Remove and return every entry (full disconnect).
    pub fn drain(&self) -> Vec<(String, SubscriptionEntry)> {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
