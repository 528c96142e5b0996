//! Process-wide message cache, one entry per group-buying room.
//!
//! Stands in for the original data-fetching cache: the owning room seeds
//! its key once, live deliveries are appended so other readers of the
//! same key observe them without a refetch. Writes are replace-by-key;
//! concurrent rooms touch disjoint keys.

use std::sync::Arc;

use dashmap::DashMap;
use sikboo_common::ChatMessage;

#[derive(Default, Clone)]
pub struct MessageCache {
    inner: Arc<DashMap<i64, Vec<ChatMessage>>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_buying_id: i64) -> Option<Vec<ChatMessage>> {
        self.inner.get(&group_buying_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, group_buying_id: i64) -> bool {
        self.inner.contains_key(&group_buying_id)
    }

    /// Replace the entry for a room (last write wins).
    pub fn replace(&self, group_buying_id: i64, messages: Vec<ChatMessage>) {
        self.inner.insert(group_buying_id, messages);
    }

    /// Append a live-delivered message to a room's entry, creating the
    /// entry if the room was never seeded.
    pub fn append(&self, group_buying_id: i64, message: ChatMessage) {
        self.inner
            .entry(group_buying_id)
            .or_default()
            .push(message);
    }
}
