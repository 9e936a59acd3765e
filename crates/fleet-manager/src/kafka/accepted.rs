// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{KAFKA_ACCEPTED_TOPIC, KAFKA_PREPARING_TOPIC, reconcile_each};
use crate::cluster::CLUSTER_TOPIC;
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{KafkaRecord, KafkaStatus};
use crate::quota::QuotaDecision;
use crate::worker::Reconciler;

/// Places accepted instances on a cluster.
///
/// An instance with no cluster available, or whose organisation is out of
/// quota, stays accepted and is retried on the next pass.
pub struct AcceptedKafkaReconciler {
    ctx: FleetContext,
}

impl AcceptedKafkaReconciler {
    /// Create the reconciler.
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    async fn place(&self, mut kafka: KafkaRecord) -> Result<()> {
        let Some(cluster) = self.ctx.placement.find_cluster(&kafka).await? else {
            debug!(
                kafka_id = %kafka.id,
                cloud_provider = %kafka.cloud_provider,
                region = %kafka.region,
                multi_az = kafka.multi_az,
                "No cluster available, instance stays accepted"
            );
            return Ok(());
        };

        let mut reserved = None;
        if kafka.subscription_id.is_none() {
            match self.ctx.quota.reserve(&kafka).await? {
                QuotaDecision::Granted { subscription_id } => {
                    reserved = Some(subscription_id.clone());
                    kafka.subscription_id = Some(subscription_id);
                }
                QuotaDecision::Denied { reason } => {
                    info!(
                        kafka_id = %kafka.id,
                        organisation_id = %kafka.organisation_id,
                        reason = %reason,
                        "Quota denied, instance stays accepted"
                    );
                    if kafka.failed_reason.as_deref() != Some(reason.as_str()) {
                        kafka.failed_reason = Some(reason);
                        self.ctx
                            .persistence
                            .save_kafka(&kafka, KafkaStatus::Accepted)
                            .await?;
                    }
                    return Ok(());
                }
            }
        }

        kafka.cluster_id = Some(cluster.id.clone());
        kafka.placement_id = Some(Uuid::new_v4().to_string());
        kafka.failed_reason = None;
        kafka.status = KafkaStatus::Preparing;

        let mut signals = self.ctx.after_commit();
        signals.defer(KAFKA_PREPARING_TOPIC);
        signals.defer(CLUSTER_TOPIC);

        if !self
            .ctx
            .persistence
            .save_kafka(&kafka, KafkaStatus::Accepted)
            .await?
        {
            debug!(kafka_id = %kafka.id, "Instance changed concurrently, skipping");
            if let Some(subscription_id) = reserved {
                self.release(&kafka, &subscription_id).await;
            }
            return Ok(());
        }
        signals.commit().await;

        info!(
            kafka_id = %kafka.id,
            cluster_id = %cluster.id,
            "Instance placed, preparing"
        );
        Ok(())
    }

    async fn release(&self, kafka: &KafkaRecord, subscription_id: &str) {
        if let Err(e) = self.ctx.quota.release(subscription_id).await {
            warn!(
                kafka_id = %kafka.id,
                subscription_id,
                error = %e,
                "Failed to release quota of an unplaced instance"
            );
        }
    }
}

#[async_trait]
impl Reconciler for AcceptedKafkaReconciler {
    fn worker_type(&self) -> &'static str {
        "kafka_accepted"
    }

    fn topic(&self) -> &'static str {
        KAFKA_ACCEPTED_TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let kafkas = match self
            .ctx
            .persistence
            .list_kafkas_by_status(KafkaStatus::Accepted)
            .await
        {
            Ok(kafkas) => kafkas,
            Err(e) => return vec![e],
        };
        reconcile_each(self.worker_type(), kafkas, |kafka| self.place(kafka)).await
    }
}
