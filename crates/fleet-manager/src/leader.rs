// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leader election over a database lease.
//!
//! Every replica runs a [`LeaderElectionManager`]. Each tick it tries to
//! acquire or renew the lease row for its lease type with one conditional
//! update; the replica whose update applies is leader until the lease
//! expires. The leader runs the registered workers, everyone else keeps them
//! stopped. A store error counts as "not leader", so a replica that cannot
//! reach the database stops reconciling before its lease runs out.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, LeaderElectionConfig};
use crate::persistence::Persistence;
use crate::worker::Worker;

/// Election state of this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    /// Not participating.
    Standby,
    /// Participating, another replica (or nobody) holds the lease.
    Following,
    /// Holding the lease and running the workers.
    Leading,
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Runs the workers on whichever replica holds the lease.
pub struct LeaderElectionManager {
    persistence: Arc<dyn Persistence>,
    identity: String,
    config: LeaderElectionConfig,
    workers: Vec<Arc<Worker>>,
    state: watch::Sender<LeaderState>,
    election: Mutex<Option<Running>>,
}

impl LeaderElectionManager {
    /// Create a manager for `workers` with a random replica identity.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        config: LeaderElectionConfig,
        workers: Vec<Arc<Worker>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(LeaderState::Standby);
        Ok(Self {
            persistence,
            identity: Uuid::new_v4().to_string(),
            config,
            workers,
            state,
            election: Mutex::new(None),
        })
    }

    /// Use a fixed replica identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Replica identity written to the lease.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current election state.
    pub fn state(&self) -> LeaderState {
        *self.state.borrow()
    }

    /// Whether this replica currently leads.
    pub fn is_leader(&self) -> bool {
        self.state() == LeaderState::Leading
    }

    /// Watch election state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LeaderState> {
        self.state.subscribe()
    }

    /// Try to acquire or renew the lease once, starting or stopping the
    /// workers on a leadership change. Returns whether this replica leads.
    pub async fn tick(&self) -> bool {
        let acquired = match self
            .persistence
            .try_acquire_lease(&self.config.lease_type, &self.identity, self.config.lease_ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                error!(
                    lease_type = %self.config.lease_type,
                    identity = %self.identity,
                    error = %e,
                    "Failed to acquire lease"
                );
                false
            }
        };

        let was_leader = self.is_leader();
        match (was_leader, acquired) {
            (false, true) => {
                info!(
                    lease_type = %self.config.lease_type,
                    identity = %self.identity,
                    workers = self.workers.len(),
                    "Acquired leadership, starting workers"
                );
                self.start_workers().await;
                self.set_state(LeaderState::Leading);
            }
            (true, false) => {
                warn!(
                    lease_type = %self.config.lease_type,
                    identity = %self.identity,
                    "Lost leadership, stopping workers"
                );
                self.stop_workers().await;
                self.set_state(LeaderState::Following);
            }
            (true, true) => {
                debug!(identity = %self.identity, "Lease renewed");
            }
            (false, false) => self.set_state(LeaderState::Following),
        }

        acquired
    }

    /// Start the election loop. No-op if already started.
    pub async fn start(self: &Arc<Self>) {
        let mut election = self.election.lock().await;
        if election.is_some() {
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let manager = self.clone();
        let stop = shutdown.clone();
        let handle = tokio::spawn(async move {
            info!(
                lease_type = %manager.config.lease_type,
                identity = %manager.identity,
                poll_interval_secs = manager.config.poll_interval.as_secs(),
                lease_ttl_secs = manager.config.lease_ttl.as_secs(),
                "Leader election started"
            );

            loop {
                manager.tick().await;

                tokio::select! {
                    biased;

                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(manager.config.poll_interval) => {}
                }
            }

            info!(identity = %manager.identity, "Leader election stopped");
        });

        *election = Some(Running { handle, shutdown });
    }

    /// Whether the election loop is running.
    pub async fn is_started(&self) -> bool {
        self.election
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Stop the election loop, stop the workers if leading, and release the
    /// lease so another replica can take over without waiting for expiry.
    pub async fn stop(&self) {
        if let Some(Running { handle, shutdown }) = self.election.lock().await.take() {
            shutdown.notify_one();
            if let Err(e) = handle.await {
                error!(error = %e, "Leader election task panicked");
            }
        }

        if self.is_leader() {
            self.stop_workers().await;
        }

        if let Err(e) = self
            .persistence
            .release_lease(&self.config.lease_type, &self.identity)
            .await
        {
            warn!(
                lease_type = %self.config.lease_type,
                identity = %self.identity,
                error = %e,
                "Failed to release lease"
            );
        }

        self.set_state(LeaderState::Standby);
    }

    async fn start_workers(&self) {
        for worker in &self.workers {
            worker.start().await;
        }
    }

    async fn stop_workers(&self) {
        for worker in &self.workers {
            worker.stop().await;
        }
    }

    fn set_state(&self, next: LeaderState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use std::time::Duration;

    fn config() -> LeaderElectionConfig {
        LeaderElectionConfig {
            lease_type: "worker_leader".to_string(),
            poll_interval: Duration::from_secs(1),
            lease_ttl: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_rejects_ttl_not_above_poll_interval() {
        let bad = LeaderElectionConfig {
            lease_ttl: Duration::from_secs(1),
            ..config()
        };
        assert!(LeaderElectionManager::new(Arc::new(MemoryPersistence::new()), bad, vec![]).is_err());
    }

    #[tokio::test]
    async fn test_single_replica_leads() {
        let manager =
            LeaderElectionManager::new(Arc::new(MemoryPersistence::new()), config(), vec![])
                .unwrap()
                .with_identity("replica-a");
        let mut states = manager.subscribe_state();

        assert_eq!(manager.state(), LeaderState::Standby);
        assert!(manager.tick().await);
        assert!(manager.is_leader());
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), LeaderState::Leading);
    }

    #[tokio::test]
    async fn test_store_error_is_not_leadership() {
        let store = MemoryPersistence::new();
        let manager = LeaderElectionManager::new(Arc::new(store.clone()), config(), vec![]).unwrap();

        assert!(manager.tick().await);
        store.set_unavailable(true);
        assert!(!manager.tick().await);
        assert_eq!(manager.state(), LeaderState::Following);
    }
}
