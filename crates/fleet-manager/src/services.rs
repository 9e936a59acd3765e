// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entry points for an API layer.
//!
//! Every state change made here wakes the worker that handles the new state,
//! once the change is stored.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cluster::CLUSTER_TOPIC;
use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::kafka::{
    KAFKA_ACCEPTED_TOPIC, KAFKA_DELETING_TOPIC, KAFKA_PROVISIONING_TOPIC, KAFKA_READY_TOPIC,
};
use crate::model::{
    ClusterStatusReport, ConditionStatus, KafkaRecord, KafkaStatus, KafkaStatusReport, NewKafka,
    StrimziVersion,
};

/// Data-plane status of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaStatusUpdate {
    /// `Ready` condition status.
    pub condition: ConditionStatus,
    /// Condition reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Detail.
    #[serde(default)]
    pub message: Option<String>,
}

/// Data-plane status of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatusUpdate {
    /// Whether the agent is ready.
    pub ready: bool,
    /// Installed Strimzi versions.
    #[serde(default)]
    pub strimzi_versions: Vec<StrimziVersion>,
}

/// Fleet operations invoked by clients and the data plane.
#[derive(Clone)]
pub struct FleetService {
    ctx: FleetContext,
}

impl FleetService {
    /// Create the service.
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    /// Record a new instance request as accepted.
    pub async fn register_kafka(&self, request: NewKafka) -> Result<KafkaRecord> {
        for (field, value) in [
            ("name", &request.name),
            ("owner", &request.owner),
            ("organisation_id", &request.organisation_id),
            ("cloud_provider", &request.cloud_provider),
            ("region", &request.region),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidRequest(format!("{field} must not be empty")));
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        let kafka = KafkaRecord::accepted(id, request, self.ctx.clock.now());

        let mut signals = self.ctx.after_commit();
        signals.defer(KAFKA_ACCEPTED_TOPIC);
        self.ctx.persistence.insert_kafka(&kafka).await?;
        signals.commit().await;

        info!(
            kafka_id = %kafka.id,
            organisation_id = %kafka.organisation_id,
            instance_type = %kafka.instance_type,
            "Kafka instance accepted"
        );
        Ok(kafka)
    }

    /// Fetch an instance.
    pub async fn get_kafka(&self, id: &str) -> Result<KafkaRecord> {
        self.ctx
            .persistence
            .get_kafka(id)
            .await?
            .ok_or_else(|| Error::KafkaNotFound(id.to_string()))
    }

    /// Mark an instance for deletion. Repeated requests are no-ops.
    pub async fn request_deletion(&self, id: &str) -> Result<KafkaRecord> {
        let mut kafka = self.get_kafka(id).await?;
        if matches!(kafka.status, KafkaStatus::Deleting | KafkaStatus::Deleted) {
            return Ok(kafka);
        }

        let previous = kafka.status;
        kafka.status = KafkaStatus::Deleting;

        let mut signals = self.ctx.after_commit();
        signals.defer(KAFKA_DELETING_TOPIC);
        if !self.ctx.persistence.save_kafka(&kafka, previous).await? {
            return Err(Error::InvalidRequest(format!(
                "kafka {id} changed while requesting deletion, retry"
            )));
        }
        signals.commit().await;

        info!(kafka_id = %kafka.id, previous_status = %previous, "Kafka deletion requested");
        Ok(kafka)
    }

    /// Store a data-plane report for an instance.
    ///
    /// Only the cluster the instance is assigned to may report on it.
    pub async fn ingest_kafka_status(
        &self,
        cluster_id: &str,
        kafka_id: &str,
        update: KafkaStatusUpdate,
    ) -> Result<()> {
        let kafka = self.get_kafka(kafka_id).await?;
        if kafka.cluster_id.as_deref() != Some(cluster_id) {
            return Err(Error::InvalidRequest(format!(
                "kafka {kafka_id} is not assigned to cluster {cluster_id}"
            )));
        }

        let report = KafkaStatusReport {
            kafka_id: kafka.id,
            cluster_id: cluster_id.to_string(),
            condition: update.condition,
            reason: update.reason,
            message: update.message,
            placement_id: kafka.placement_id,
            reported_at: self.ctx.clock.now(),
        };

        let mut signals = self.ctx.after_commit();
        signals.defer(KAFKA_PROVISIONING_TOPIC);
        signals.defer(KAFKA_READY_TOPIC);
        self.ctx
            .persistence
            .upsert_kafka_status_report(&report)
            .await?;
        signals.commit().await;
        Ok(())
    }

    /// Store a data-plane report for a cluster.
    pub async fn ingest_cluster_status(
        &self,
        cluster_id: &str,
        update: ClusterStatusUpdate,
    ) -> Result<()> {
        let cluster = self.ctx.persistence.get_cluster(cluster_id).await?;
        if cluster.is_none_or(|c| c.deleted_at.is_some()) {
            return Err(Error::ClusterNotFound(cluster_id.to_string()));
        }

        let report = ClusterStatusReport {
            cluster_id: cluster_id.to_string(),
            ready: update.ready,
            strimzi_versions: update.strimzi_versions,
            reported_at: self.ctx.clock.now(),
        };

        let mut signals = self.ctx.after_commit();
        signals.defer(CLUSTER_TOPIC);
        self.ctx
            .persistence
            .upsert_cluster_status_report(&report)
            .await?;
        signals.commit().await;
        Ok(())
    }
}
