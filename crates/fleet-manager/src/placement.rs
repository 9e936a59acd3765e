// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Choosing the cluster a new Kafka instance lands on.
//!
//! Strategies only read the store. The accepted worker persists the choice.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{AutoscaleConfig, DataPlaneConfig, ManualCluster, ScalingMode};
use crate::error::Result;
use crate::model::{ClusterCriteria, ClusterRecord, KafkaRecord};
use crate::persistence::Persistence;

/// Picks a cluster for an instance.
#[async_trait]
pub trait ClusterPlacementStrategy: Send + Sync {
    /// Cluster for `kafka`, or `None` when no cluster can take it now.
    async fn find_cluster(&self, kafka: &KafkaRecord) -> Result<Option<ClusterRecord>>;
}

/// First ready cluster matching the instance with room left, in creation order.
///
/// Room is measured against the autoscale capacity of the cluster's current
/// node count.
pub struct FirstReadyCluster {
    autoscale: AutoscaleConfig,
    persistence: Arc<dyn Persistence>,
}

impl FirstReadyCluster {
    /// Place against clusters in `persistence` sized by `autoscale`.
    pub fn new(autoscale: AutoscaleConfig, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            autoscale,
            persistence,
        }
    }
}

#[async_trait]
impl ClusterPlacementStrategy for FirstReadyCluster {
    async fn find_cluster(&self, kafka: &KafkaRecord) -> Result<Option<ClusterRecord>> {
        let clusters = self
            .persistence
            .find_clusters(&ClusterCriteria::ready_for(kafka))
            .await?;
        if clusters.is_empty() {
            return Ok(None);
        }

        let ids: Vec<String> = clusters.iter().map(|c| c.id.clone()).collect();
        let counts = self.persistence.count_kafkas_by_cluster(&ids).await?;

        for cluster in clusters {
            let count = counts.get(&cluster.id).copied().unwrap_or(0);
            let capacity = self.autoscale.capacity(cluster.compute_nodes);
            if count < capacity {
                return Ok(Some(cluster));
            }
            debug!(
                kafka_id = %kafka.id,
                cluster_id = %cluster.id,
                count,
                capacity,
                "Cluster at capacity"
            );
        }

        Ok(None)
    }
}

/// First configured, schedulable cluster with room under its instance limit.
///
/// Clusters are tried in configuration order, not creation order.
pub struct FirstSchedulableWithinLimit {
    clusters: Vec<ManualCluster>,
    persistence: Arc<dyn Persistence>,
}

impl FirstSchedulableWithinLimit {
    /// Place against `clusters`, counting instances in `persistence`.
    pub fn new(clusters: Vec<ManualCluster>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            clusters,
            persistence,
        }
    }
}

#[async_trait]
impl ClusterPlacementStrategy for FirstSchedulableWithinLimit {
    async fn find_cluster(&self, kafka: &KafkaRecord) -> Result<Option<ClusterRecord>> {
        let mut candidates: Vec<ClusterRecord> = self
            .persistence
            .find_clusters(&ClusterCriteria::ready_for(kafka))
            .await?
            .into_iter()
            .filter(|c| {
                self.clusters
                    .iter()
                    .any(|m| m.cluster_id == c.id && m.schedulable)
            })
            .collect();

        if candidates.is_empty() {
            debug!(kafka_id = %kafka.id, "No schedulable cluster matches instance");
            return Ok(None);
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let counts = self.persistence.count_kafkas_by_cluster(&ids).await?;

        for manual in &self.clusters {
            let Some(pos) = candidates.iter().position(|c| c.id == manual.cluster_id) else {
                continue;
            };
            let count = counts.get(&manual.cluster_id).copied().unwrap_or(0);
            if count < manual.kafka_instance_limit {
                return Ok(Some(candidates.swap_remove(pos)));
            }
            debug!(
                kafka_id = %kafka.id,
                cluster_id = %manual.cluster_id,
                count,
                limit = manual.kafka_instance_limit,
                "Cluster at instance limit"
            );
        }

        Ok(None)
    }
}

/// Strategy for the configured scaling mode.
pub fn placement_for(
    config: &DataPlaneConfig,
    persistence: Arc<dyn Persistence>,
) -> Arc<dyn ClusterPlacementStrategy> {
    match config.scaling_mode {
        ScalingMode::Manual => Arc::new(FirstSchedulableWithinLimit::new(
            config.clusters.clone(),
            persistence,
        )),
        ScalingMode::Auto => Arc::new(FirstReadyCluster::new(config.autoscale, persistence)),
    }
}
