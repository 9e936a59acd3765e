// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    KAFKA_DELETING_TOPIC, KAFKA_PROVISIONING_TOPIC, KAFKA_READY_TOPIC, elapsed_since,
    reconcile_each,
};
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{DataPlanePhase, KafkaRecord, KafkaStatus};
use crate::worker::Reconciler;

/// Move a provisioning instance to ready.
///
/// The write is guarded on `provisioning`, so when two passes race only the
/// first applies and only it records the creation metrics. Returns whether
/// this call made the transition.
pub async fn mark_ready(ctx: &FleetContext, mut kafka: KafkaRecord) -> Result<bool> {
    kafka.status = KafkaStatus::Ready;
    kafka.failed_reason = None;

    let mut signals = ctx.after_commit();
    signals.defer(KAFKA_READY_TOPIC);
    if !ctx
        .persistence
        .save_kafka(&kafka, KafkaStatus::Provisioning)
        .await?
    {
        debug!(kafka_id = %kafka.id, "Instance already left provisioning");
        return Ok(false);
    }
    signals.commit().await;

    let elapsed = elapsed_since(ctx, kafka.created_at);
    ctx.metrics.kafka_ready(&kafka, elapsed);
    info!(
        kafka_id = %kafka.id,
        elapsed_secs = elapsed.as_secs(),
        "Instance ready"
    );
    Ok(true)
}

/// Follows data-plane reports for instances being installed.
pub struct ProvisioningKafkaReconciler {
    ctx: FleetContext,
}

impl ProvisioningKafkaReconciler {
    /// Create the reconciler.
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    async fn reconcile_kafka(&self, mut kafka: KafkaRecord) -> Result<()> {
        let Some(report) = self
            .ctx
            .persistence
            .get_kafka_status_report(&kafka.id)
            .await?
        else {
            return Ok(());
        };

        match report.phase() {
            DataPlanePhase::Installing | DataPlanePhase::Unknown => Ok(()),
            DataPlanePhase::Ready => mark_ready(&self.ctx, kafka).await.map(|_| ()),
            DataPlanePhase::Failed => {
                kafka.status = KafkaStatus::Failed;
                kafka.failed_reason = Some(format!(
                    "Kafka reported as failed: '{}'",
                    report.message.as_deref().unwrap_or_default()
                ));
                if self
                    .ctx
                    .persistence
                    .save_kafka(&kafka, KafkaStatus::Provisioning)
                    .await?
                {
                    self.ctx.metrics.kafka_failed(&kafka);
                    warn!(
                        kafka_id = %kafka.id,
                        reason = ?kafka.failed_reason,
                        "Data plane reported instance failed"
                    );
                }
                Ok(())
            }
            DataPlanePhase::Rejected => {
                // Only a rejection of the current placement triggers a new one.
                if report.placement_id != kafka.placement_id {
                    debug!(
                        kafka_id = %kafka.id,
                        report_placement_id = ?report.placement_id,
                        placement_id = ?kafka.placement_id,
                        "Rejection refers to an earlier placement"
                    );
                    return Ok(());
                }
                let previous = kafka.placement_id.replace(Uuid::new_v4().to_string());
                if self
                    .ctx
                    .persistence
                    .save_kafka(&kafka, KafkaStatus::Provisioning)
                    .await?
                {
                    info!(
                        kafka_id = %kafka.id,
                        cluster_id = %report.cluster_id,
                        previous_placement_id = ?previous,
                        placement_id = ?kafka.placement_id,
                        message = ?report.message,
                        "Data plane rejected instance, re-placing"
                    );
                }
                Ok(())
            }
            DataPlanePhase::Deleted => {
                kafka.status = KafkaStatus::Deleting;
                let mut signals = self.ctx.after_commit();
                signals.defer(KAFKA_DELETING_TOPIC);
                if self
                    .ctx
                    .persistence
                    .save_kafka(&kafka, KafkaStatus::Provisioning)
                    .await?
                {
                    signals.commit().await;
                    info!(kafka_id = %kafka.id, "Data plane deleted instance, deleting");
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Reconciler for ProvisioningKafkaReconciler {
    fn worker_type(&self) -> &'static str {
        "kafka_provisioning"
    }

    fn topic(&self) -> &'static str {
        KAFKA_PROVISIONING_TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let kafkas = match self
            .ctx
            .persistence
            .list_kafkas_by_status(KafkaStatus::Provisioning)
            .await
        {
            Ok(kafkas) => kafkas,
            Err(e) => return vec![e],
        };
        reconcile_each(self.worker_type(), kafkas, |kafka| self.reconcile_kafka(kafka)).await
    }
}
