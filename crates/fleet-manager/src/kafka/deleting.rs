// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{KAFKA_DELETING_TOPIC, reconcile_each};
use crate::cluster::CLUSTER_TOPIC;
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{KafkaRecord, KafkaStatus};
use crate::provider::ClusterSpec;
use crate::worker::Reconciler;

/// Tears down instances marked for deletion.
///
/// The instance is tombstoned only once its cluster's provider confirms the
/// resources are gone. Instances that never reached a cluster are tombstoned
/// straight away.
pub struct DeletingKafkaReconciler {
    ctx: FleetContext,
}

impl DeletingKafkaReconciler {
    /// Create the reconciler.
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    async fn reconcile_kafka(&self, kafka: KafkaRecord) -> Result<()> {
        if !self.remove_resources(&kafka).await? {
            debug!(kafka_id = %kafka.id, "Waiting for instance resources to be removed");
            return Ok(());
        }

        if let Some(subscription_id) = &kafka.subscription_id {
            self.ctx.quota.release(subscription_id).await?;
        }

        let mut signals = self.ctx.after_commit();
        signals.defer(CLUSTER_TOPIC);
        if self
            .ctx
            .persistence
            .soft_delete_kafka(&kafka.id, KafkaStatus::Deleting)
            .await?
        {
            signals.commit().await;
            info!(kafka_id = %kafka.id, "Instance deleted");
        }
        Ok(())
    }

    async fn remove_resources(&self, kafka: &KafkaRecord) -> Result<bool> {
        let Some(cluster_id) = &kafka.cluster_id else {
            return Ok(true);
        };
        let cluster = self.ctx.persistence.get_cluster(cluster_id).await?;
        let Some(cluster) = cluster.filter(|c| c.deleted_at.is_none()) else {
            warn!(
                kafka_id = %kafka.id,
                cluster_id = %cluster_id,
                "Cluster of deleting instance no longer exists"
            );
            return Ok(true);
        };

        let provider = self.ctx.providers.get(cluster.provider_type)?;
        let removed = provider
            .remove_resources(&ClusterSpec::from(&cluster), &format!("kafka-{}", kafka.id))
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl Reconciler for DeletingKafkaReconciler {
    fn worker_type(&self) -> &'static str {
        "kafka_deleting"
    }

    fn topic(&self) -> &'static str {
        KAFKA_DELETING_TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let kafkas = match self
            .ctx
            .persistence
            .list_kafkas_by_status(KafkaStatus::Deleting)
            .await
        {
            Ok(kafkas) => kafkas,
            Err(e) => return vec![e],
        };
        reconcile_each(self.worker_type(), kafkas, |kafka| self.reconcile_kafka(kafka)).await
    }
}
