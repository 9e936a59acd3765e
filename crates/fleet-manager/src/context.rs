// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capabilities shared by the workers and services.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::DataPlaneConfig;
use crate::metrics::MetricsRecorder;
use crate::persistence::Persistence;
use crate::placement::ClusterPlacementStrategy;
use crate::provider::Providers;
use crate::quota::QuotaService;
use crate::signal::{AfterCommit, SignalBus};

/// Everything a reconciler needs, built once by the runtime.
#[derive(Clone)]
pub struct FleetContext {
    /// Fleet store.
    pub persistence: Arc<dyn Persistence>,
    /// Wake-up signals.
    pub bus: Arc<dyn SignalBus>,
    /// Time source for policies.
    pub clock: Arc<dyn Clock>,
    /// Metric events.
    pub metrics: Arc<dyn MetricsRecorder>,
    /// Cluster backends.
    pub providers: Providers,
    /// Entitlement checks.
    pub quota: Arc<dyn QuotaService>,
    /// Cluster selection for new instances.
    pub placement: Arc<dyn ClusterPlacementStrategy>,
    /// Data-plane settings.
    pub dataplane: Arc<DataPlaneConfig>,
}

impl FleetContext {
    /// Start a batch of signals to send once a change is stored.
    pub fn after_commit(&self) -> AfterCommit {
        AfterCommit::new(self.bus.clone())
    }
}
