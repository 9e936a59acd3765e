// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster lifecycle worker.
//!
//! The cluster worker is the only writer of cluster records. Each pass first
//! syncs the configured cluster list (manual scaling only), then advances
//! every live cluster by at most one state.
//!
//! ```text
//! accepted ─► provisioning ─► provisioned ─► waiting_for_operator ─► ready ◄─► full
//!                  │                                                   │
//!                  ▼                                                   ▼
//!               failed              deleted ◄── cleanup ◄──────── deprovisioning
//! ```
//!
//! A terminal provider error in any live state fails the cluster.

mod manual_config;

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::config::ScalingMode;
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{ClusterRecord, ClusterStatus, KafkaStatus};
use crate::provider::{
    ClusterProvider, ClusterRequest, ClusterSpec, FLEETSHARD_ADDON, IdentityProviderInfo,
    ProviderClusterState, ProviderError, STRIMZI_ADDON,
};
use crate::worker::Reconciler;

pub use manual_config::reconcile_configured_clusters;

/// Wakes the cluster worker.
pub const CLUSTER_TOPIC: &str = "reconcile:cluster";

/// Instances still present on each of `cluster_ids`, deleting ones included.
///
/// A cluster is only torn down once this reaches zero.
async fn resident_instances(
    ctx: &FleetContext,
    cluster_ids: &[String],
) -> Result<HashMap<String, i64>> {
    let mut counts = ctx.persistence.count_kafkas_by_cluster(cluster_ids).await?;
    for kafka in ctx
        .persistence
        .list_kafkas_by_status(KafkaStatus::Deleting)
        .await?
    {
        if let Some(cluster_id) = kafka.cluster_id
            && cluster_ids.contains(&cluster_id)
        {
            *counts.entry(cluster_id).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Drives cluster records through their lifecycle.
pub struct ClusterReconciler {
    ctx: FleetContext,
}

impl ClusterReconciler {
    /// Create the reconciler.
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    async fn reconcile_cluster(&self, cluster: ClusterRecord) -> Result<()> {
        if cluster.status.is_terminal() {
            return Ok(());
        }

        match self.advance(cluster.clone()).await {
            Err(Error::Provider(e)) if e.is_terminal() => {
                error!(
                    cluster_id = %cluster.id,
                    status = %cluster.status,
                    error = %e,
                    "Provider failed cluster"
                );
                self.transition(cluster, ClusterStatus::Failed).await?;
                Ok(())
            }
            other => other,
        }
    }

    async fn advance(&self, cluster: ClusterRecord) -> Result<()> {
        match cluster.status {
            ClusterStatus::Accepted => self.create(cluster).await,
            ClusterStatus::Provisioning => self.check_provisioning(cluster).await,
            ClusterStatus::Provisioned => self.install_operator(cluster).await,
            ClusterStatus::WaitingForOperator => self.await_operator(cluster).await,
            ClusterStatus::Ready | ClusterStatus::Full => match self.ctx.dataplane.scaling_mode {
                ScalingMode::Auto => self.reconcile_capacity(cluster).await,
                ScalingMode::Manual => Ok(()),
            },
            ClusterStatus::Deprovisioning => self.deprovision(cluster).await,
            ClusterStatus::Cleanup => self.cleanup(cluster).await,
            ClusterStatus::Deleted | ClusterStatus::Failed => Ok(()),
        }
    }

    async fn create(&self, mut cluster: ClusterRecord) -> Result<()> {
        let provider = self.provider(&cluster)?;
        let nodes = cluster
            .compute_nodes
            .max(self.ctx.dataplane.autoscale.min_compute_nodes);
        let spec = provider
            .create(&ClusterRequest::for_cluster(&cluster, nodes))
            .await?;

        cluster.internal_id = spec.internal_id;
        cluster.external_id = spec.external_id;
        cluster.compute_nodes = spec.compute_nodes;
        self.transition(cluster, ClusterStatus::Provisioning).await?;
        Ok(())
    }

    async fn check_provisioning(&self, cluster: ClusterRecord) -> Result<()> {
        let provider = self.provider(&cluster)?;
        match provider.check_status(&ClusterSpec::from(&cluster)).await? {
            ProviderClusterState::Ready => {
                self.transition(cluster, ClusterStatus::Provisioned).await?;
            }
            ProviderClusterState::Error(reason) => {
                error!(cluster_id = %cluster.id, reason = %reason, "Cluster provisioning failed");
                self.transition(cluster, ClusterStatus::Failed).await?;
            }
            state => {
                debug!(cluster_id = %cluster.id, state = ?state, "Cluster still provisioning");
            }
        }
        Ok(())
    }

    async fn install_operator(&self, mut cluster: ClusterRecord) -> Result<()> {
        let provider = self.provider(&cluster)?;
        let mut changed = false;

        if cluster.identity_provider_id.is_none() {
            let info = provider
                .add_identity_provider(
                    &ClusterSpec::from(&cluster),
                    IdentityProviderInfo::for_cluster(&cluster.id),
                )
                .await?;
            info!(
                cluster_id = %cluster.id,
                identity_provider_id = ?info.id,
                "Identity provider added"
            );
            cluster.identity_provider_id = info.id;
            changed = true;
        }

        let spec = ClusterSpec::from(&cluster);
        let strimzi = provider.install_addon(&spec, STRIMZI_ADDON).await?;
        let fleetshard = provider.install_addon(&spec, FLEETSHARD_ADDON).await?;

        if !(strimzi && fleetshard) {
            debug!(
                cluster_id = %cluster.id,
                strimzi,
                fleetshard,
                "Waiting for addons"
            );
            if changed {
                self.ctx
                    .persistence
                    .save_cluster(&cluster, ClusterStatus::Provisioned)
                    .await?;
            }
            return Ok(());
        }

        if cluster.cluster_dns.is_none() {
            cluster.cluster_dns = Some(provider.cluster_dns(&spec).await?);
        }
        self.transition(cluster, ClusterStatus::WaitingForOperator)
            .await?;
        Ok(())
    }

    async fn await_operator(&self, mut cluster: ClusterRecord) -> Result<()> {
        let report = self
            .ctx
            .persistence
            .get_cluster_status_report(&cluster.id)
            .await?;
        match report {
            Some(report) if report.ready => {
                cluster.available_strimzi_versions = report.strimzi_versions;
                self.transition(cluster, ClusterStatus::Ready).await?;
            }
            _ => debug!(cluster_id = %cluster.id, "Waiting for data-plane operator"),
        }
        Ok(())
    }

    /// Toggle ready/full against capacity and scale nodes in steps.
    async fn reconcile_capacity(&self, mut cluster: ClusterRecord) -> Result<()> {
        let autoscale = self.ctx.dataplane.autoscale;
        let count = self.instance_count(&cluster).await?;
        let capacity = autoscale.capacity(cluster.compute_nodes);

        let status = cluster.status;
        match status {
            ClusterStatus::Ready if count >= capacity => {
                info!(cluster_id = %cluster.id, count, capacity, "Cluster at capacity");
                self.transition(cluster, ClusterStatus::Full).await?;
            }
            ClusterStatus::Ready
                if count == 0 && cluster.compute_nodes > autoscale.min_compute_nodes =>
            {
                let delta = autoscale
                    .scale_step
                    .min(cluster.compute_nodes - autoscale.min_compute_nodes);
                let provider = self.provider(&cluster)?;
                let Some(spec) =
                    unsupported_as_none(provider.scale_down(&ClusterSpec::from(&cluster), delta).await)?
                else {
                    return Ok(());
                };
                info!(
                    cluster_id = %cluster.id,
                    from = cluster.compute_nodes,
                    to = spec.compute_nodes,
                    "Scaled idle cluster down"
                );
                cluster.compute_nodes = spec.compute_nodes;
                self.ctx
                    .persistence
                    .save_cluster(&cluster, ClusterStatus::Ready)
                    .await?;
            }
            ClusterStatus::Full if count < capacity => {
                self.transition(cluster, ClusterStatus::Ready).await?;
            }
            ClusterStatus::Full if cluster.compute_nodes < autoscale.max_compute_nodes => {
                let delta = autoscale
                    .scale_step
                    .min(autoscale.max_compute_nodes - cluster.compute_nodes);
                let provider = self.provider(&cluster)?;
                let Some(spec) =
                    unsupported_as_none(provider.scale_up(&ClusterSpec::from(&cluster), delta).await)?
                else {
                    return Ok(());
                };
                info!(
                    cluster_id = %cluster.id,
                    from = cluster.compute_nodes,
                    to = spec.compute_nodes,
                    "Scaled full cluster up"
                );
                cluster.compute_nodes = spec.compute_nodes;
                self.transition(cluster, ClusterStatus::Ready).await?;
            }
            ClusterStatus::Full => {
                debug!(cluster_id = %cluster.id, "Full cluster already at maximum size");
            }
            _ => {}
        }
        Ok(())
    }

    async fn deprovision(&self, cluster: ClusterRecord) -> Result<()> {
        let count = resident_instances(&self.ctx, std::slice::from_ref(&cluster.id))
            .await?
            .get(&cluster.id)
            .copied()
            .unwrap_or(0);
        if count > 0 {
            debug!(
                cluster_id = %cluster.id,
                count,
                "Waiting for instances to leave cluster"
            );
            return Ok(());
        }

        let provider = self.provider(&cluster)?;
        if provider.delete(&ClusterSpec::from(&cluster)).await? {
            self.transition(cluster, ClusterStatus::Cleanup).await?;
        } else {
            debug!(cluster_id = %cluster.id, "Waiting for provider to delete cluster");
        }
        Ok(())
    }

    async fn cleanup(&self, cluster: ClusterRecord) -> Result<()> {
        if self
            .ctx
            .persistence
            .soft_delete_cluster(&cluster.id, ClusterStatus::Cleanup)
            .await?
        {
            self.ctx
                .metrics
                .cluster_status(&cluster, ClusterStatus::Deleted);
            info!(cluster_id = %cluster.id, "Cluster deleted");
        }
        Ok(())
    }

    async fn instance_count(&self, cluster: &ClusterRecord) -> Result<i64> {
        let counts = self
            .ctx
            .persistence
            .count_kafkas_by_cluster(std::slice::from_ref(&cluster.id))
            .await?;
        Ok(counts.get(&cluster.id).copied().unwrap_or(0))
    }

    fn provider(&self, cluster: &ClusterRecord) -> Result<std::sync::Arc<dyn ClusterProvider>> {
        Ok(self.ctx.providers.get(cluster.provider_type)?)
    }

    /// Guarded status change. Returns whether it applied.
    async fn transition(&self, mut cluster: ClusterRecord, next: ClusterStatus) -> Result<bool> {
        let previous = cluster.status;
        cluster.status = next;

        let applied = self
            .ctx
            .persistence
            .save_cluster(&cluster, previous)
            .await?;
        if applied {
            self.ctx.metrics.cluster_status(&cluster, next);
            info!(
                cluster_id = %cluster.id,
                from = %previous,
                to = %next,
                "Cluster status changed"
            );
        } else {
            debug!(cluster_id = %cluster.id, "Cluster changed concurrently, skipping");
        }
        Ok(applied)
    }
}

/// Providers that cannot scale leave the cluster as it is.
fn unsupported_as_none(
    result: std::result::Result<ClusterSpec, ProviderError>,
) -> Result<Option<ClusterSpec>> {
    match result {
        Ok(spec) => Ok(Some(spec)),
        Err(ProviderError::Unsupported { provider, operation }) => {
            debug!(%provider, operation, "Provider cannot scale, keeping cluster size");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    fn worker_type(&self) -> &'static str {
        "cluster"
    }

    fn topic(&self) -> &'static str {
        CLUSTER_TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let mut errors = Vec::new();

        if self.ctx.dataplane.scaling_mode == ScalingMode::Manual {
            errors.extend(reconcile_configured_clusters(&self.ctx).await);
        }

        let clusters = match self.ctx.persistence.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                errors.push(e);
                return errors;
            }
        };

        for cluster in clusters {
            let cluster_id = cluster.id.clone();
            if let Err(e) = self.reconcile_cluster(cluster).await {
                debug!(cluster_id = %cluster_id, error = %e, "Cluster not reconciled");
                errors.push(e);
            }
        }
        errors
    }
}
