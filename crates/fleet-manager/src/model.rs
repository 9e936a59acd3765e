// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Records and lifecycle states shared by the store, the workers, and the services.
//!
//! Statuses are persisted as lowercase snake_case text and parsed back with
//! [`FromStr`], so the same enums are used for SQL rows, the placement
//! configuration file, and log fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted value did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected text.
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Persisted text form.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

/// Lifecycle state of a backing cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Desired-capacity request recorded, nothing created yet.
    Accepted,
    /// Create issued to the provider.
    Provisioning,
    /// Backing resource exists.
    Provisioned,
    /// Data-plane operator being installed.
    WaitingForOperator,
    /// Schedulable.
    Ready,
    /// Ready but at instance capacity.
    Full,
    /// Being torn down.
    Deprovisioning,
    /// Provider resource gone, local cleanup pending.
    Cleanup,
    /// Tombstoned.
    Deleted,
    /// Unrecoverable provider error.
    Failed,
}

text_enum!(ClusterStatus, "cluster status", {
    Accepted => "accepted",
    Provisioning => "provisioning",
    Provisioned => "provisioned",
    WaitingForOperator => "waiting_for_operator",
    Ready => "ready",
    Full => "full",
    Deprovisioning => "deprovisioning",
    Cleanup => "cleanup",
    Deleted => "deleted",
    Failed => "failed",
});

impl ClusterStatus {
    /// Terminal states are never advanced by the cluster worker.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClusterStatus::Deleted | ClusterStatus::Failed)
    }
}

/// Lifecycle state of a Kafka instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KafkaStatus {
    /// Created by a client, waiting for placement.
    Accepted,
    /// Assigned to a cluster.
    Preparing,
    /// Waiting for the data plane to report it healthy.
    Provisioning,
    /// Healthy.
    Ready,
    /// Unrecoverable error, see `failed_reason`.
    Failed,
    /// Teardown requested.
    Deleting,
    /// Teardown confirmed.
    Deleted,
}

text_enum!(KafkaStatus, "kafka status", {
    Accepted => "accepted",
    Preparing => "preparing",
    Provisioning => "provisioning",
    Ready => "ready",
    Failed => "failed",
    Deleting => "deleting",
    Deleted => "deleted",
});

/// Which provider implementation manages a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Clusters created and scaled through a managed provisioning API.
    Managed,
    /// Pre-existing clusters registered through configuration.
    Standalone,
}

text_enum!(ProviderKind, "provider type", {
    Managed => "managed",
    Standalone => "standalone",
});

/// Kafka instance offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    /// Long-lived instance.
    Standard,
    /// Evaluation instance, removed after the configured lifespan.
    Eval,
}

text_enum!(InstanceType, "instance type", {
    Standard => "standard",
    Eval => "eval",
});

/// Strimzi operator version available on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrimziVersion {
    /// Version string, e.g. `strimzi-cluster-operator.v0.23.0-0`.
    pub version: String,
    /// Whether the operator for this version is ready.
    pub ready: bool,
}

/// Backing cluster record.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ClusterRecord {
    /// Unique identifier.
    pub id: String,
    /// Provider implementation managing this cluster.
    #[sqlx(try_from = "String")]
    pub provider_type: ProviderKind,
    /// Cloud provider, e.g. `aws`.
    pub cloud_provider: String,
    /// Cloud region, e.g. `us-east-1`.
    pub region: String,
    /// Whether the cluster spans availability zones.
    pub multi_az: bool,
    /// Current lifecycle state.
    #[sqlx(try_from = "String")]
    pub status: ClusterStatus,
    /// Provider-internal identifier, set once created.
    pub internal_id: Option<String>,
    /// Provider-external identifier, set once created.
    pub external_id: Option<String>,
    /// Identity provider registered on the cluster.
    pub identity_provider_id: Option<String>,
    /// Base DNS name for routes on this cluster.
    pub cluster_dns: Option<String>,
    /// Strimzi versions reported by the data plane.
    #[sqlx(json)]
    pub available_strimzi_versions: Vec<StrimziVersion>,
    /// Whether placement may use this cluster.
    pub schedulable: bool,
    /// Compute nodes, used for autoscaled capacity.
    pub compute_nodes: i32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ClusterRecord {
    /// A new cluster record with no provider state yet.
    pub fn new(
        id: impl Into<String>,
        provider_type: ProviderKind,
        cloud_provider: impl Into<String>,
        region: impl Into<String>,
        multi_az: bool,
        status: ClusterStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            provider_type,
            cloud_provider: cloud_provider.into(),
            region: region.into(),
            multi_az,
            status,
            internal_id: None,
            external_id: None,
            identity_provider_id: None,
            cluster_dns: None,
            available_strimzi_versions: Vec::new(),
            schedulable: true,
            compute_nodes: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Fields a client supplies when requesting a Kafka instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKafka {
    /// Display name, also the prefix of the bootstrap host.
    pub name: String,
    /// Requesting user.
    pub owner: String,
    /// Owning organisation, the quota key.
    pub organisation_id: String,
    /// Offering.
    pub instance_type: InstanceType,
    /// Requested cloud provider.
    pub cloud_provider: String,
    /// Requested region.
    pub region: String,
    /// Whether the instance must span availability zones.
    pub multi_az: bool,
}

/// Kafka instance record.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct KafkaRecord {
    /// Unique identifier (lowercase, no hyphens).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Requesting user.
    pub owner: String,
    /// Owning organisation.
    pub organisation_id: String,
    /// Offering.
    #[sqlx(try_from = "String")]
    pub instance_type: InstanceType,
    /// Requested cloud provider.
    pub cloud_provider: String,
    /// Requested region.
    pub region: String,
    /// Whether the instance spans availability zones.
    pub multi_az: bool,
    /// Assigned cluster.
    pub cluster_id: Option<String>,
    /// Changes every time the instance is (re)assigned to a cluster.
    pub placement_id: Option<String>,
    /// Current lifecycle state.
    #[sqlx(try_from = "String")]
    pub status: KafkaStatus,
    /// Client bootstrap host.
    pub bootstrap_server_host: Option<String>,
    /// Why the instance failed or is held in its state.
    pub failed_reason: Option<String>,
    /// Quota subscription backing the instance.
    pub subscription_id: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl KafkaRecord {
    /// A freshly accepted instance.
    pub fn accepted(id: impl Into<String>, request: NewKafka, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: request.name,
            owner: request.owner,
            organisation_id: request.organisation_id,
            instance_type: request.instance_type,
            cloud_provider: request.cloud_provider,
            region: request.region,
            multi_az: request.multi_az,
            cluster_id: None,
            placement_id: None,
            status: KafkaStatus::Accepted,
            bootstrap_server_host: None,
            failed_reason: None,
            subscription_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Assigned cluster, or an [`crate::Error::InvalidRecord`] naming the state that needed it.
    pub fn require_cluster_id(&self) -> crate::error::Result<&str> {
        self.cluster_id
            .as_deref()
            .ok_or_else(|| crate::Error::InvalidRecord {
                id: self.id.clone(),
                reason: format!("no cluster assigned in status {}", self.status),
            })
    }
}

/// Named lease row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LeaseRecord {
    /// Unique identifier.
    pub id: String,
    /// Coordination point, e.g. `worker_leader`.
    pub lease_type: String,
    /// Identity of the current or last holder.
    pub leader: String,
    /// Held while in the future.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Status of a data-plane `Ready` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold; `reason` says why.
    False,
    /// Not yet known.
    Unknown,
}

text_enum!(ConditionStatus, "condition status", {
    True => "true",
    False => "false",
    Unknown => "unknown",
});

/// Data-plane view of an instance, derived from its latest report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPlanePhase {
    /// Still being installed.
    Installing,
    /// Healthy.
    Ready,
    /// Hard failure.
    Failed,
    /// Removed from the data plane.
    Deleted,
    /// The cluster refused the instance.
    Rejected,
    /// The agent does not know the condition yet; nothing to act on.
    Unknown,
}

/// Latest data-plane report for a Kafka instance.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct KafkaStatusReport {
    /// Reported instance.
    pub kafka_id: String,
    /// Cluster the report came from.
    pub cluster_id: String,
    /// `Ready` condition status.
    #[sqlx(try_from = "String")]
    pub condition: ConditionStatus,
    /// Condition reason (`Installing`, `Error`, `Deleted`, `Rejected`).
    pub reason: Option<String>,
    /// Human readable detail.
    pub message: Option<String>,
    /// Placement of the instance when the report arrived.
    pub placement_id: Option<String>,
    /// When the report was received.
    pub reported_at: DateTime<Utc>,
}

impl KafkaStatusReport {
    /// Interpret the `Ready` condition.
    ///
    /// Reasons match case-insensitively. An unrecognised reason is treated as
    /// still installing.
    pub fn phase(&self) -> DataPlanePhase {
        match self.condition {
            ConditionStatus::True => return DataPlanePhase::Ready,
            ConditionStatus::Unknown => return DataPlanePhase::Unknown,
            ConditionStatus::False => {}
        }
        let Some(reason) = self.reason.as_deref() else {
            return DataPlanePhase::Installing;
        };
        [
            ("Error", DataPlanePhase::Failed),
            ("Deleted", DataPlanePhase::Deleted),
            ("Rejected", DataPlanePhase::Rejected),
        ]
        .into_iter()
        .find(|(known, _)| reason.eq_ignore_ascii_case(known))
        .map_or(DataPlanePhase::Installing, |(_, phase)| phase)
    }
}

/// Latest data-plane report for a cluster.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ClusterStatusReport {
    /// Reporting cluster.
    pub cluster_id: String,
    /// Whether the data-plane agent is ready.
    pub ready: bool,
    /// Strimzi versions installed.
    #[sqlx(json)]
    pub strimzi_versions: Vec<StrimziVersion>,
    /// When the report was received.
    pub reported_at: DateTime<Utc>,
}

/// Criteria for cluster lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCriteria {
    /// Cloud provider.
    pub cloud_provider: String,
    /// Region.
    pub region: String,
    /// Multi-AZ requirement.
    pub multi_az: bool,
    /// Required status.
    pub status: ClusterStatus,
}

impl ClusterCriteria {
    /// Ready clusters matching an instance's requirements.
    pub fn ready_for(kafka: &KafkaRecord) -> Self {
        Self {
            cloud_provider: kafka.cloud_provider.clone(),
            region: kafka.region.clone(),
            multi_az: kafka.multi_az,
            status: ClusterStatus::Ready,
        }
    }

    /// Whether a cluster satisfies these criteria.
    pub fn matches(&self, cluster: &ClusterRecord) -> bool {
        cluster.cloud_provider == self.cloud_provider
            && cluster.region == self.region
            && cluster.multi_az == self.multi_az
            && cluster.status == self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(condition: ConditionStatus, reason: Option<&str>) -> KafkaStatusReport {
        KafkaStatusReport {
            kafka_id: "k1".to_string(),
            cluster_id: "c1".to_string(),
            condition,
            reason: reason.map(str::to_string),
            message: None,
            placement_id: None,
            reported_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_text_round_trips() {
        for status in [
            ClusterStatus::WaitingForOperator,
            ClusterStatus::Deprovisioning,
            ClusterStatus::Full,
        ] {
            assert_eq!(status.as_str().parse::<ClusterStatus>().unwrap(), status);
        }
        assert_eq!(
            "provisioning".parse::<KafkaStatus>().unwrap(),
            KafkaStatus::Provisioning
        );
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "sleeping".parse::<KafkaStatus>().unwrap_err();
        assert_eq!(err.value, "sleeping");
        assert_eq!(err.to_string(), "unknown kafka status: sleeping");
    }

    #[test]
    fn test_report_phase_mapping() {
        assert_eq!(
            report(ConditionStatus::True, None).phase(),
            DataPlanePhase::Ready
        );
        assert_eq!(
            report(ConditionStatus::False, Some("Error")).phase(),
            DataPlanePhase::Failed
        );
        assert_eq!(
            report(ConditionStatus::False, Some("Rejected")).phase(),
            DataPlanePhase::Rejected
        );
        assert_eq!(
            report(ConditionStatus::False, Some("Deleted")).phase(),
            DataPlanePhase::Deleted
        );
        assert_eq!(
            report(ConditionStatus::False, Some("Installing")).phase(),
            DataPlanePhase::Installing
        );
        assert_eq!(
            report(ConditionStatus::False, Some("rejected")).phase(),
            DataPlanePhase::Rejected
        );
        assert_eq!(
            report(ConditionStatus::False, Some("ERROR")).phase(),
            DataPlanePhase::Failed
        );
        assert_eq!(
            report(ConditionStatus::Unknown, Some("Error")).phase(),
            DataPlanePhase::Unknown
        );
        assert_eq!(
            report(ConditionStatus::Unknown, None).phase(),
            DataPlanePhase::Unknown
        );
        assert_eq!(
            report(ConditionStatus::False, Some("SomethingNew")).phase(),
            DataPlanePhase::Installing
        );
    }

    #[test]
    fn test_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&ClusterStatus::WaitingForOperator).unwrap();
        assert_eq!(json, "\"waiting_for_operator\"");
    }

    #[test]
    fn test_require_cluster_id() {
        let request = NewKafka {
            name: "orders".to_string(),
            owner: "alice".to_string(),
            organisation_id: "org-1".to_string(),
            instance_type: InstanceType::Standard,
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            multi_az: true,
        };
        let mut kafka = KafkaRecord::accepted("abc", request, Utc::now());
        assert!(matches!(
            kafka.require_cluster_id(),
            Err(crate::Error::InvalidRecord { .. })
        ));

        kafka.cluster_id = Some("c1".to_string());
        assert_eq!(kafka.require_cluster_id().unwrap(), "c1");
    }
}
