// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use tracing::debug;

use super::SignalBus;

/// Signals deferred until a unit of work commits.
///
/// Dropping without [`commit`](Self::commit) discards the queued topics, so
/// a rolled back change never wakes anyone.
pub struct AfterCommit {
    bus: Arc<dyn SignalBus>,
    topics: Vec<String>,
}

impl AfterCommit {
    /// Start an empty batch on `bus`.
    pub fn new(bus: Arc<dyn SignalBus>) -> Self {
        Self {
            bus,
            topics: Vec::new(),
        }
    }

    /// Queue `topic`. Duplicates are sent once.
    pub fn defer(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
    }

    /// Send every queued topic in the order queued.
    pub async fn commit(mut self) {
        let topics = std::mem::take(&mut self.topics);
        for topic in &topics {
            self.bus.notify(topic).await;
        }
    }
}

impl Drop for AfterCommit {
    fn drop(&mut self) {
        if !self.topics.is_empty() {
            debug!(
                topics = ?self.topics,
                "Discarding signals of an uncommitted change"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::InMemorySignalBus;

    #[tokio::test]
    async fn test_commit_sends_queued_topics() {
        let bus = Arc::new(InMemorySignalBus::new());
        let a = bus.subscribe("a");
        let b = bus.subscribe("b");

        let mut batch = AfterCommit::new(bus.clone());
        batch.defer("a");
        batch.defer("a");
        batch.defer("b");
        assert!(!a.is_signaled());

        batch.commit().await;
        assert!(a.is_signaled());
        assert!(b.is_signaled());
    }

    #[tokio::test]
    async fn test_drop_discards_topics() {
        let bus = Arc::new(InMemorySignalBus::new());
        let sub = bus.subscribe("a");

        {
            let mut batch = AfterCommit::new(bus.clone());
            batch.defer("a");
        }

        assert!(!sub.is_signaled());
    }
}
