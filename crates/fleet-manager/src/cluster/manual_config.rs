// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync the store with the configured cluster list.

use tracing::{info, warn};

use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{ClusterRecord, ClusterStatus};

/// Bring stored clusters in line with the configuration file.
///
/// - configured clusters missing from the store are registered with their
///   configured status and DNS;
/// - `schedulable` is copied from the configuration;
/// - stored clusters no longer configured are deprovisioned, unless
///   instances still run on them.
///
/// Returns the errors of clusters that could not be synced.
pub async fn reconcile_configured_clusters(ctx: &FleetContext) -> Vec<Error> {
    let stored = match ctx.persistence.list_clusters().await {
        Ok(stored) => stored,
        Err(e) => return vec![e],
    };

    let mut errors = Vec::new();
    if let Err(e) = register_and_sync(ctx, &stored).await {
        errors.push(e);
    }
    if let Err(e) = deprovision_unconfigured(ctx, &stored).await {
        errors.push(e);
    }
    errors
}

async fn register_and_sync(ctx: &FleetContext, stored: &[ClusterRecord]) -> Result<()> {
    for configured in &ctx.dataplane.clusters {
        match stored.iter().find(|c| c.id == configured.cluster_id) {
            Some(existing) if existing.schedulable != configured.schedulable => {
                let mut updated = existing.clone();
                updated.schedulable = configured.schedulable;
                if ctx
                    .persistence
                    .save_cluster(&updated, existing.status)
                    .await?
                {
                    info!(
                        cluster_id = %existing.id,
                        schedulable = configured.schedulable,
                        "Synced cluster schedulability"
                    );
                }
            }
            Some(_) => {}
            None => {
                if ctx
                    .persistence
                    .get_cluster(&configured.cluster_id)
                    .await?
                    .is_some()
                {
                    warn!(
                        cluster_id = %configured.cluster_id,
                        "Configured cluster was deleted, not registering it again"
                    );
                    continue;
                }

                let mut cluster = ClusterRecord::new(
                    &configured.cluster_id,
                    configured.provider_type,
                    &configured.cloud_provider,
                    &configured.region,
                    configured.multi_az,
                    configured.status,
                    ctx.clock.now(),
                );
                cluster.schedulable = configured.schedulable;
                cluster.cluster_dns = configured.cluster_dns.clone();
                ctx.persistence.insert_cluster(&cluster).await?;

                info!(
                    cluster_id = %cluster.id,
                    provider_type = %cluster.provider_type,
                    status = %cluster.status,
                    "Registered configured cluster"
                );
            }
        }
    }
    Ok(())
}

async fn deprovision_unconfigured(ctx: &FleetContext, stored: &[ClusterRecord]) -> Result<()> {
    let unconfigured: Vec<&ClusterRecord> = stored
        .iter()
        .filter(|c| ctx.dataplane.cluster(&c.id).is_none())
        .filter(|c| {
            !matches!(
                c.status,
                ClusterStatus::Deprovisioning
                    | ClusterStatus::Cleanup
                    | ClusterStatus::Deleted
                    | ClusterStatus::Failed
            )
        })
        .collect();
    if unconfigured.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = unconfigured.iter().map(|c| c.id.clone()).collect();
    let counts = super::resident_instances(ctx, &ids).await?;

    for cluster in unconfigured {
        let instances = counts.get(&cluster.id).copied().unwrap_or(0);
        if instances > 0 {
            warn!(
                cluster_id = %cluster.id,
                instances,
                "Cluster removed from configuration still has instances, keeping it"
            );
            continue;
        }

        let mut deprovisioning = cluster.clone();
        deprovisioning.status = ClusterStatus::Deprovisioning;
        if ctx
            .persistence
            .save_cluster(&deprovisioning, cluster.status)
            .await?
        {
            ctx.metrics
                .cluster_status(&deprovisioning, ClusterStatus::Deprovisioning);
            info!(
                cluster_id = %cluster.id,
                "Cluster removed from configuration, deprovisioning"
            );
        }
    }
    Ok(())
}
