// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the fleet manager.
//!
//! [`FleetRuntime`] builds every component once (store, signal bus,
//! providers, placement, quota, workers, leader election) and manages their
//! tasks, so the control plane can run inside an existing tokio application
//! as well as from the `fleet-manager` binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleet_manager::persistence::PostgresPersistence;
//! use fleet_manager::runtime::FleetRuntime;
//! use fleet_manager::signal::{InMemorySignalBus, PgSignalBus};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let bus = PgSignalBus::new(pool.clone(), Arc::new(InMemorySignalBus::new()));
//!
//!     let runtime = FleetRuntime::builder()
//!         .persistence(Arc::new(PostgresPersistence::new(pool)))
//!         .signal_listener(bus.listener())
//!         .signal_bus(Arc::new(bus))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... serve the API with runtime.service() ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::cluster::ClusterReconciler;
use crate::config::{DataPlaneConfig, LeaderElectionConfig};
use crate::context::FleetContext;
use crate::kafka;
use crate::leader::LeaderElectionManager;
use crate::metrics::{MetricsRecorder, TracingMetrics};
use crate::persistence::Persistence;
use crate::placement::{ClusterPlacementStrategy, placement_for};
use crate::provider::Providers;
use crate::quota::{OrganisationQuota, QuotaService, UnlimitedQuota};
use crate::services::FleetService;
use crate::signal::{InMemorySignalBus, SignalBus, SignalListener};
use crate::worker::{Reconciler, Worker};

/// Builder for creating a [`FleetRuntime`].
pub struct FleetRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    bus: Option<Arc<dyn SignalBus>>,
    signal_listener: Option<SignalListener>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsRecorder>,
    providers: Providers,
    quota: Option<Arc<dyn QuotaService>>,
    placement: Option<Arc<dyn ClusterPlacementStrategy>>,
    dataplane: DataPlaneConfig,
    leader: LeaderElectionConfig,
    identity: Option<String>,
    worker_poll_interval: Duration,
}

impl Default for FleetRuntimeBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            bus: None,
            signal_listener: None,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(TracingMetrics),
            providers: Providers::default(),
            quota: None,
            placement: None,
            dataplane: DataPlaneConfig::default(),
            leader: LeaderElectionConfig::default(),
            identity: None,
            worker_poll_interval: Duration::from_secs(30),
        }
    }
}

impl FleetRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fleet store (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the signal bus.
    ///
    /// Default: a process-local [`InMemorySignalBus`]
    pub fn signal_bus(mut self, bus: Arc<dyn SignalBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run a listener relaying cross-replica signals while the runtime runs.
    ///
    /// Default: none
    pub fn signal_listener(mut self, listener: SignalListener) -> Self {
        self.signal_listener = Some(listener);
        self
    }

    /// Set the time source.
    ///
    /// Default: [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the metrics recorder.
    ///
    /// Default: [`TracingMetrics`]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the cluster providers.
    ///
    /// Default: standalone provider only
    pub fn providers(mut self, providers: Providers) -> Self {
        self.providers = providers;
        self
    }

    /// Set the quota service.
    ///
    /// Default: [`OrganisationQuota`] when the data-plane configuration has
    /// quotas, otherwise [`UnlimitedQuota`]
    pub fn quota(mut self, quota: Arc<dyn QuotaService>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Set the placement strategy.
    ///
    /// Default: chosen from the scaling mode
    pub fn placement(mut self, placement: Arc<dyn ClusterPlacementStrategy>) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Set the data-plane configuration.
    ///
    /// Default: manual scaling with no clusters
    pub fn dataplane(mut self, dataplane: DataPlaneConfig) -> Self {
        self.dataplane = dataplane;
        self
    }

    /// Set the leader election configuration.
    ///
    /// Default: lease `worker_leader`, 10 second poll, 30 second TTL
    pub fn leader_election(mut self, config: LeaderElectionConfig) -> Self {
        self.leader = config;
        self
    }

    /// Set the replica identity written to the lease.
    ///
    /// Default: a random UUID
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set how often each worker reconciles without a signal.
    ///
    /// Default: 30 seconds
    pub fn worker_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval = interval;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing or the configuration
    /// is invalid.
    pub fn build(self) -> Result<FleetRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        if self.worker_poll_interval.is_zero() {
            anyhow::bail!("worker poll interval must be greater than zero");
        }
        self.dataplane.validate()?;

        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(InMemorySignalBus::new()));
        let quota = self.quota.unwrap_or_else(|| match &self.dataplane.quota {
            Some(config) => Arc::new(OrganisationQuota::new(config.clone(), persistence.clone())),
            None => Arc::new(UnlimitedQuota),
        });
        let placement = self
            .placement
            .unwrap_or_else(|| placement_for(&self.dataplane, persistence.clone()));

        let ctx = FleetContext {
            persistence: persistence.clone(),
            bus: bus.clone(),
            clock: self.clock,
            metrics: self.metrics.clone(),
            providers: self.providers,
            quota,
            placement,
            dataplane: Arc::new(self.dataplane),
        };

        let mut reconcilers: Vec<Arc<dyn Reconciler>> = kafka::reconcilers(&ctx);
        reconcilers.push(Arc::new(ClusterReconciler::new(ctx.clone())));
        let workers: Vec<Arc<Worker>> = reconcilers
            .into_iter()
            .map(|reconciler| {
                Arc::new(Worker::new(
                    reconciler,
                    bus.clone(),
                    self.metrics.clone(),
                    self.worker_poll_interval,
                ))
            })
            .collect();

        let mut leader = LeaderElectionManager::new(persistence, self.leader, workers.clone())?;
        if let Some(identity) = self.identity {
            leader = leader.with_identity(identity);
        }

        Ok(FleetRuntimeConfig {
            ctx,
            leader: Arc::new(leader),
            workers,
            signal_listener: self.signal_listener,
        })
    }
}

/// Configuration for a [`FleetRuntime`], with every component built.
pub struct FleetRuntimeConfig {
    ctx: FleetContext,
    leader: Arc<LeaderElectionManager>,
    workers: Vec<Arc<Worker>>,
    signal_listener: Option<SignalListener>,
}

impl FleetRuntimeConfig {
    /// Shared capabilities.
    pub fn context(&self) -> &FleetContext {
        &self.ctx
    }

    /// Start the signal listener and leader election.
    pub async fn start(self) -> Result<FleetRuntime> {
        let (listener_handle, listener_shutdown) = match self.signal_listener {
            Some(listener) => {
                let shutdown = listener.shutdown_handle();
                let handle = tokio::spawn(async move {
                    listener.run().await;
                });
                (Some(handle), Some(shutdown))
            }
            None => (None, None),
        };

        self.leader.start().await;

        info!(
            identity = %self.leader.identity(),
            workers = self.workers.len(),
            scaling_mode = ?self.ctx.dataplane.scaling_mode,
            signal_listener = listener_handle.is_some(),
            "FleetRuntime started"
        );

        Ok(FleetRuntime {
            ctx: self.ctx,
            leader: self.leader,
            workers: self.workers,
            listener_handle,
            listener_shutdown,
        })
    }
}

/// A running fleet manager control plane.
///
/// The runtime manages:
/// - Leader election, which runs the workers while this replica holds the lease
/// - One worker per Kafka phase plus the cluster worker
/// - The cross-replica signal listener (optional)
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct FleetRuntime {
    ctx: FleetContext,
    leader: Arc<LeaderElectionManager>,
    workers: Vec<Arc<Worker>>,
    listener_handle: Option<JoinHandle<()>>,
    listener_shutdown: Option<Arc<Notify>>,
}

impl FleetRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FleetRuntimeBuilder {
        FleetRuntimeBuilder::new()
    }

    /// Shared capabilities.
    pub fn context(&self) -> &FleetContext {
        &self.ctx
    }

    /// API entry points backed by this runtime.
    pub fn service(&self) -> FleetService {
        FleetService::new(self.ctx.clone())
    }

    /// Leader election of this replica.
    pub fn leader(&self) -> &Arc<LeaderElectionManager> {
        &self.leader
    }

    /// Workers managed by leader election.
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops leader election (which stops the workers after their in-flight
    /// passes and releases the lease), then the signal listener.
    pub async fn shutdown(self) -> Result<()> {
        info!("FleetRuntime shutting down...");

        self.leader.stop().await;

        if let Some(shutdown) = &self.listener_shutdown {
            shutdown.notify_one();
        }
        if let Some(handle) = self.listener_handle
            && let Err(e) = handle.await
        {
            error!("Signal listener task panicked: {}", e);
        }

        info!("FleetRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub async fn is_running(&self) -> bool {
        let listener_running = self
            .listener_handle
            .as_ref()
            .is_none_or(|h| !h.is_finished());
        listener_running && self.leader.is_started().await
    }
}
