// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for the fleet manager.
//!
//! Every lifecycle write is guarded by the status the caller expects the row
//! to be in and reports whether it applied, so a stale replica that missed a
//! stop can never move a record it no longer owns.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryPersistence;
pub use self::postgres::PostgresPersistence;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    ClusterCriteria, ClusterRecord, ClusterStatus, ClusterStatusReport, InstanceType,
    KafkaRecord, KafkaStatus, KafkaStatusReport, LeaseRecord,
};

/// Storage capability used by the election manager, workers, and services.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Leases
    // ------------------------------------------------------------------

    /// Acquire or renew `lease_type` for `leader` until now + `ttl`.
    ///
    /// Succeeds only when `leader` already holds the lease or it has expired.
    /// The row is created on first use.
    async fn try_acquire_lease(&self, lease_type: &str, leader: &str, ttl: Duration)
    -> Result<bool>;

    /// Expire the lease now if `leader` still holds it.
    async fn release_lease(&self, lease_type: &str, leader: &str) -> Result<()>;

    /// Current lease row.
    async fn get_lease(&self, lease_type: &str) -> Result<Option<LeaseRecord>>;

    // ------------------------------------------------------------------
    // Clusters
    // ------------------------------------------------------------------

    /// Insert a new cluster.
    async fn insert_cluster(&self, cluster: &ClusterRecord) -> Result<()>;

    /// Cluster by id, tombstoned ones included.
    async fn get_cluster(&self, id: &str) -> Result<Option<ClusterRecord>>;

    /// All live clusters in creation order.
    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>>;

    /// Live clusters matching `criteria`, in creation order.
    async fn find_clusters(&self, criteria: &ClusterCriteria) -> Result<Vec<ClusterRecord>>;

    /// Write every mutable field if the stored status is still `expected`.
    async fn save_cluster(&self, cluster: &ClusterRecord, expected: ClusterStatus) -> Result<bool>;

    /// Tombstone a cluster in status `expected` and mark it deleted.
    async fn soft_delete_cluster(&self, id: &str, expected: ClusterStatus) -> Result<bool>;

    // ------------------------------------------------------------------
    // Kafka instances
    // ------------------------------------------------------------------

    /// Insert a new instance.
    async fn insert_kafka(&self, kafka: &KafkaRecord) -> Result<()>;

    /// Instance by id, tombstoned ones included.
    async fn get_kafka(&self, id: &str) -> Result<Option<KafkaRecord>>;

    /// Live instances in `status`, in creation order.
    async fn list_kafkas_by_status(&self, status: KafkaStatus) -> Result<Vec<KafkaRecord>>;

    /// Write every mutable field if the stored status is still `expected`.
    async fn save_kafka(&self, kafka: &KafkaRecord, expected: KafkaStatus) -> Result<bool>;

    /// Tombstone an instance in status `expected` and mark it deleted.
    async fn soft_delete_kafka(&self, id: &str, expected: KafkaStatus) -> Result<bool>;

    /// Instances consuming capacity on each of `cluster_ids`: neither
    /// deleting nor deleted.
    ///
    /// Clusters without instances are absent from the map.
    async fn count_kafkas_by_cluster(&self, cluster_ids: &[String])
    -> Result<HashMap<String, i64>>;

    /// Placed instances held by an organisation: past accepted, neither
    /// failed nor deleted.
    async fn count_kafkas_by_organisation(&self, organisation_id: &str) -> Result<i64>;

    /// Live instances of `instance_type` created before `created_before`
    /// that are not already failed or being deleted.
    async fn list_expired_kafkas(
        &self,
        instance_type: InstanceType,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<KafkaRecord>>;

    // ------------------------------------------------------------------
    // Data-plane status reports
    // ------------------------------------------------------------------

    /// Replace the latest report for an instance.
    async fn upsert_kafka_status_report(&self, report: &KafkaStatusReport) -> Result<()>;

    /// Latest report for an instance.
    async fn get_kafka_status_report(&self, kafka_id: &str) -> Result<Option<KafkaStatusReport>>;

    /// Replace the latest report for a cluster.
    async fn upsert_cluster_status_report(&self, report: &ClusterStatusReport) -> Result<()>;

    /// Latest report for a cluster.
    async fn get_cluster_status_report(
        &self,
        cluster_id: &str,
    ) -> Result<Option<ClusterStatusReport>>;
}
