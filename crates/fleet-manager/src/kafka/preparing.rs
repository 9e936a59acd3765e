// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{KAFKA_PREPARING_TOPIC, KAFKA_PROVISIONING_TOPIC, reconcile_each};
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::{KafkaRecord, KafkaStatus};
use crate::provider::ClusterSpec;
use crate::worker::Reconciler;

/// Characters of the instance name kept in the bootstrap host.
const HOST_NAME_PREFIX_LEN: usize = 10;

/// Client bootstrap host for an instance.
///
/// The name is lowercased, characters that are not valid in a DNS label
/// become `-`, and it is cut to ten characters so the label stays short.
pub fn bootstrap_host(name: &str, kafka_id: &str, domain: &str) -> String {
    let prefix: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(HOST_NAME_PREFIX_LEN)
        .collect();
    format!("{}-{}.{}", prefix, kafka_id.to_lowercase(), domain)
}

/// Assigns bootstrap hosts to placed instances and hands them to the data
/// plane.
///
/// Transient failures are retried until the instance has been around for
/// longer than the configured preparing window; terminal failures fail the
/// instance at once.
pub struct PreparingKafkaReconciler {
    ctx: FleetContext,
}

impl PreparingKafkaReconciler {
    /// Create the reconciler.
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    async fn reconcile_kafka(&self, kafka: KafkaRecord) -> Result<()> {
        let err = match self.prepare(kafka.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if matches!(err, Error::InvalidRecord { .. }) || (err.is_transient() && !self.expired(&kafka))
        {
            return Err(err);
        }

        error!(kafka_id = %kafka.id, error = %err, "Preparing instance failed");
        self.fail(kafka, &err).await
    }

    async fn prepare(&self, mut kafka: KafkaRecord) -> Result<()> {
        let cluster_id = kafka.require_cluster_id()?;
        let cluster = self
            .ctx
            .persistence
            .get_cluster(cluster_id)
            .await?
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))?;

        let domain = match (&self.ctx.dataplane.kafka_domain, &cluster.cluster_dns) {
            (Some(domain), _) => domain.clone(),
            (None, Some(dns)) => dns.clone(),
            (None, None) => {
                self.ctx
                    .providers
                    .get(cluster.provider_type)?
                    .cluster_dns(&ClusterSpec::from(&cluster))
                    .await?
            }
        };

        kafka.bootstrap_server_host = Some(bootstrap_host(&kafka.name, &kafka.id, &domain));
        kafka.placement_id = Some(Uuid::new_v4().to_string());
        kafka.status = KafkaStatus::Provisioning;

        let mut signals = self.ctx.after_commit();
        signals.defer(KAFKA_PROVISIONING_TOPIC);
        if self
            .ctx
            .persistence
            .save_kafka(&kafka, KafkaStatus::Preparing)
            .await?
        {
            signals.commit().await;
            info!(
                kafka_id = %kafka.id,
                bootstrap_server_host = ?kafka.bootstrap_server_host,
                "Instance prepared, provisioning"
            );
        }
        Ok(())
    }

    fn expired(&self, kafka: &KafkaRecord) -> bool {
        let window = chrono::Duration::from_std(self.ctx.dataplane.max_preparing_duration)
            .unwrap_or(chrono::Duration::MAX);
        self.ctx.clock.now() - kafka.created_at > window
    }

    async fn fail(&self, mut kafka: KafkaRecord, cause: &Error) -> Result<()> {
        kafka.status = KafkaStatus::Failed;
        kafka.failed_reason = Some(format!("Failed to prepare Kafka instance: {cause}"));
        if self
            .ctx
            .persistence
            .save_kafka(&kafka, KafkaStatus::Preparing)
            .await?
        {
            self.ctx.metrics.kafka_failed(&kafka);
        } else {
            warn!(kafka_id = %kafka.id, "Instance changed concurrently, not marked failed");
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PreparingKafkaReconciler {
    fn worker_type(&self) -> &'static str {
        "kafka_preparing"
    }

    fn topic(&self) -> &'static str {
        KAFKA_PREPARING_TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let kafkas = match self
            .ctx
            .persistence
            .list_kafkas_by_status(KafkaStatus::Preparing)
            .await
        {
            Ok(kafkas) => kafkas,
            Err(e) => return vec![e],
        };
        reconcile_each(self.worker_type(), kafkas, |kafka| self.reconcile_kafka(kafka)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_host_format() {
        assert_eq!(
            bootstrap_host("my-kafka", "abc123", "kafka.example.com"),
            "my-kafka-abc123.kafka.example.com"
        );
    }

    #[test]
    fn test_bootstrap_host_truncates_and_sanitizes_name() {
        assert_eq!(
            bootstrap_host("My_Very.Long Kafka Name", "ABCDEF", "apps.example.com"),
            "my-very-lo-abcdef.apps.example.com"
        );
    }
}
