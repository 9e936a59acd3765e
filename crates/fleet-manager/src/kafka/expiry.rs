// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use tracing::info;

use super::{KAFKA_DELETING_TOPIC, KAFKA_EXPIRY_TOPIC, reconcile_each};
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{InstanceType, KafkaRecord, KafkaStatus};
use crate::worker::Reconciler;

/// Deletes eval instances that outlived their lifespan.
pub struct ExpiryReconciler {
    ctx: FleetContext,
}

impl ExpiryReconciler {
    /// Create the reconciler.
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    async fn expire(&self, mut kafka: KafkaRecord) -> Result<()> {
        let previous = kafka.status;
        kafka.status = KafkaStatus::Deleting;

        let mut signals = self.ctx.after_commit();
        signals.defer(KAFKA_DELETING_TOPIC);
        if self.ctx.persistence.save_kafka(&kafka, previous).await? {
            signals.commit().await;
            info!(
                kafka_id = %kafka.id,
                created_at = %kafka.created_at,
                previous_status = %previous,
                "Eval instance expired, deleting"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ExpiryReconciler {
    fn worker_type(&self) -> &'static str {
        "kafka_expiry"
    }

    fn topic(&self) -> &'static str {
        KAFKA_EXPIRY_TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let lifespan = chrono::Duration::from_std(self.ctx.dataplane.eval_lifespan)
            .unwrap_or(chrono::Duration::MAX);
        let now = self.ctx.clock.now();
        let Some(cutoff) = now.checked_sub_signed(lifespan) else {
            return Vec::new();
        };

        let kafkas = match self
            .ctx
            .persistence
            .list_expired_kafkas(InstanceType::Eval, cutoff)
            .await
        {
            Ok(kafkas) => kafkas,
            Err(e) => return vec![e],
        };
        reconcile_each(self.worker_type(), kafkas, |kafka| self.expire(kafka)).await
    }
}
