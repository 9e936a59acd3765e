// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use tracing::{info, warn};

use super::{KAFKA_DELETING_TOPIC, KAFKA_READY_TOPIC, reconcile_each};
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{DataPlanePhase, KafkaRecord, KafkaStatus};
use crate::worker::Reconciler;

/// Watches ready instances for removal by the data plane.
///
/// Ready is terminal for placement: a late rejection is ignored.
pub struct ReadyKafkaReconciler {
    ctx: FleetContext,
}

impl ReadyKafkaReconciler {
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
            DataPlanePhase::Ready | DataPlanePhase::Installing | DataPlanePhase::Unknown => {}
            DataPlanePhase::Rejected => {
                info!(
                    kafka_id = %kafka.id,
                    cluster_id = %report.cluster_id,
                    "Ignoring rejection of a ready instance"
                );
            }
            DataPlanePhase::Failed => {
                warn!(
                    kafka_id = %kafka.id,
                    message = ?report.message,
                    "Data plane reports error for ready instance"
                );
            }
            DataPlanePhase::Deleted => {
                kafka.status = KafkaStatus::Deleting;
                let mut signals = self.ctx.after_commit();
                signals.defer(KAFKA_DELETING_TOPIC);
                if self
                    .ctx
                    .persistence
                    .save_kafka(&kafka, KafkaStatus::Ready)
                    .await?
                {
                    signals.commit().await;
                    info!(kafka_id = %kafka.id, "Data plane deleted instance, deleting");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ReadyKafkaReconciler {
    fn worker_type(&self) -> &'static str {
        "kafka_ready"
    }

    fn topic(&self) -> &'static str {
        KAFKA_READY_TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let kafkas = match self
            .ctx
            .persistence
            .list_kafkas_by_status(KafkaStatus::Ready)
            .await
        {
            Ok(kafkas) => kafkas,
            Err(e) => return vec![e],
        };
        reconcile_each(self.worker_type(), kafkas, |kafka| self.reconcile_kafka(kafka)).await
    }
}
