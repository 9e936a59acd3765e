// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wake-up signals between state changes and the workers that react to them.
//!
//! A signal carries nothing but its topic. Each subscription holds a single
//! "signaled" flag: any number of notifications before the subscriber looks
//! collapse into one observation, and a notification sent while nobody is
//! subscribed is dropped.
//!
//! - [`InMemorySignalBus`]: process-local registry.
//! - [`PgSignalBus`]: relays notifications between replicas over PostgreSQL
//!   `LISTEN/NOTIFY`, delivering inbound ones through an in-memory bus.
//! - [`AfterCommit`]: queues signals for a unit of work and fires them only
//!   once the work is committed.

mod after_commit;
mod memory;
mod postgres;

pub use after_commit::AfterCommit;
pub use memory::{InMemorySignalBus, Subscription};
pub use postgres::{CHANNEL, PgSignalBus, SignalListener};

use async_trait::async_trait;

/// Topic-keyed publish/subscribe.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Subscribe to `topic`. The subscription is released on drop.
    fn subscribe(&self, topic: &str) -> Subscription;

    /// Mark every current subscription of `topic` as signaled.
    async fn notify(&self, topic: &str);
}
