// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-local signal bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::trace;

use super::SignalBus;

/// Per-subscription flag plus a waker for async waiters.
#[derive(Default)]
struct Slot {
    signaled: AtomicBool,
    notify: Notify,
}

impl Slot {
    fn raise(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        // Stores a permit when nobody is waiting yet.
        self.notify.notify_one();
    }
}

type Topics = HashMap<String, HashMap<u64, Arc<Slot>>>;

#[derive(Default)]
struct Registry {
    topics: Mutex<Topics>,
    next_id: AtomicU64,
}

impl Registry {
    fn topics(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, topic: &str, id: u64) {
        let mut topics = self.topics();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// In-memory [`SignalBus`].
///
/// Topics are reference counted: the entry for a topic exists only while at
/// least one subscription to it is open.
#[derive(Default)]
pub struct InMemorySignalBus {
    registry: Arc<Registry>,
}

impl InMemorySignalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of topics with at least one open subscription.
    pub fn topic_count(&self) -> usize {
        self.registry.topics().len()
    }

    /// Number of open subscriptions to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.topics().get(topic).map_or(0, HashMap::len)
    }

    fn raise(&self, topic: &str) {
        let topics = self.registry.topics();
        match topics.get(topic) {
            Some(subscribers) => {
                for slot in subscribers.values() {
                    slot.raise();
                }
            }
            None => trace!(topic, "Signal without subscribers dropped"),
        }
    }
}

#[async_trait]
impl SignalBus for InMemorySignalBus {
    fn subscribe(&self, topic: &str) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::default());
        self.registry
            .topics()
            .entry(topic.to_string())
            .or_default()
            .insert(id, slot.clone());

        Subscription {
            topic: topic.to_string(),
            id,
            slot,
            registry: Arc::downgrade(&self.registry),
            closed: AtomicBool::new(false),
        }
    }

    async fn notify(&self, topic: &str) {
        self.raise(topic);
    }
}

/// Handle to one subscription.
pub struct Subscription {
    topic: String,
    id: u64,
    slot: Arc<Slot>,
    registry: Weak<Registry>,
    closed: AtomicBool,
}

impl Subscription {
    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether a notification arrived since the last check. Clears the flag.
    pub fn is_signaled(&self) -> bool {
        self.slot.signaled.swap(false, Ordering::SeqCst)
    }

    /// Wait until signaled, then clear the flag.
    ///
    /// Cancel safe: a notification that races with dropping this future is
    /// kept for the next call.
    pub async fn signaled(&self) {
        loop {
            if self.is_signaled() {
                return;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Release the subscription. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.topic, self.id);
        }
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_marks_subscribers() {
        let bus = InMemorySignalBus::new();
        let a = bus.subscribe("reconcile:kafka");
        let b = bus.subscribe("reconcile:kafka");
        let other = bus.subscribe("reconcile:cluster");

        bus.notify("reconcile:kafka").await;

        assert!(a.is_signaled());
        assert!(b.is_signaled());
        assert!(!other.is_signaled());
    }

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let bus = InMemorySignalBus::new();
        let sub = bus.subscribe("t");

        for _ in 0..5 {
            bus.notify("t").await;
        }

        assert!(sub.is_signaled());
        assert!(!sub.is_signaled());
    }

    #[tokio::test]
    async fn test_notify_before_subscribe_is_not_queued() {
        let bus = InMemorySignalBus::new();
        bus.notify("t").await;

        let sub = bus.subscribe("t");
        assert!(!sub.is_signaled());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_topic() {
        let bus = InMemorySignalBus::new();
        let a = bus.subscribe("t");
        let b = bus.subscribe("t");
        assert_eq!(bus.subscriber_count("t"), 2);

        a.close();
        a.close();
        assert!(a.is_closed());
        assert_eq!(bus.subscriber_count("t"), 1);
        assert_eq!(bus.topic_count(), 1);

        drop(b);
        assert_eq!(bus.topic_count(), 0);

        // A closed subscription no longer receives anything.
        bus.notify("t").await;
        assert!(!a.is_signaled());
    }

    #[tokio::test]
    async fn test_signaled_wakes_waiter() {
        let bus = Arc::new(InMemorySignalBus::new());
        let sub = bus.subscribe("t");

        let notifier = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            notifier.notify("t").await;
        });

        tokio::time::timeout(Duration::from_secs(1), sub.signaled())
            .await
            .expect("waiter should be woken");
        assert!(!sub.is_signaled());
    }

    #[tokio::test]
    async fn test_signaled_returns_immediately_when_already_raised() {
        let bus = InMemorySignalBus::new();
        let sub = bus.subscribe("t");
        bus.notify("t").await;

        tokio::time::timeout(Duration::from_millis(50), sub.signaled())
            .await
            .expect("pending flag should be observed");
    }

    #[tokio::test]
    async fn test_subscription_outlives_bus() {
        let bus = InMemorySignalBus::new();
        let sub = bus.subscribe("t");
        drop(bus);

        sub.close();
        assert!(sub.is_closed());
    }
}
