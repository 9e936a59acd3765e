// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence backend.
//!
//! Lease expiry and record timestamps use the database clock (`NOW()`), so
//! replicas with skewed clocks still agree on who holds a lease.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::Persistence;
use crate::error::Result;
use crate::model::{
    ClusterCriteria, ClusterRecord, ClusterStatus, ClusterStatusReport, InstanceType,
    KafkaRecord, KafkaStatus, KafkaStatusReport, LeaseRecord,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const CLUSTER_COLUMNS: &str = r#"
    id, provider_type, cloud_provider, region, multi_az, status,
    internal_id, external_id, identity_provider_id, cluster_dns,
    available_strimzi_versions, schedulable, compute_nodes,
    created_at, updated_at, deleted_at
"#;

const KAFKA_COLUMNS: &str = r#"
    id, name, owner, organisation_id, instance_type, cloud_provider, region,
    multi_az, cluster_id, placement_id, status, bootstrap_server_host,
    failed_reason, subscription_id, created_at, updated_at, deleted_at
"#;

// ============================================================================
// Lease Operations
// ============================================================================

/// Acquire or renew a lease with a single conditional update.
pub async fn try_acquire_lease(
    pool: &PgPool,
    lease_type: &str,
    leader: &str,
    ttl: Duration,
) -> Result<bool> {
    sqlx::query(
        r#"
        INSERT INTO leader_leases (id, lease_type, leader, expires_at)
        VALUES ($1, $2, '', NULL)
        ON CONFLICT (lease_type) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(lease_type)
    .execute(pool)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE leader_leases
        SET leader = $2,
            expires_at = NOW() + make_interval(secs => $3)
        WHERE lease_type = $1
          AND (leader = $2 OR expires_at IS NULL OR expires_at <= NOW())
        "#,
    )
    .bind(lease_type)
    .bind(leader)
    .bind(ttl.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Expire a lease immediately if `leader` holds it.
pub async fn release_lease(pool: &PgPool, lease_type: &str, leader: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE leader_leases
        SET expires_at = NOW()
        WHERE lease_type = $1 AND leader = $2
        "#,
    )
    .bind(lease_type)
    .bind(leader)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a lease row.
pub async fn get_lease(pool: &PgPool, lease_type: &str) -> Result<Option<LeaseRecord>> {
    let lease = sqlx::query_as::<_, LeaseRecord>(
        r#"
        SELECT id, lease_type, leader, expires_at
        FROM leader_leases
        WHERE lease_type = $1
        "#,
    )
    .bind(lease_type)
    .fetch_optional(pool)
    .await?;

    Ok(lease)
}

// ============================================================================
// Cluster Operations
// ============================================================================

/// Insert a cluster record.
pub async fn insert_cluster(pool: &PgPool, cluster: &ClusterRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO clusters (
            id, provider_type, cloud_provider, region, multi_az, status,
            internal_id, external_id, identity_provider_id, cluster_dns,
            available_strimzi_versions, schedulable, compute_nodes,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
        "#,
    )
    .bind(&cluster.id)
    .bind(cluster.provider_type.as_str())
    .bind(&cluster.cloud_provider)
    .bind(&cluster.region)
    .bind(cluster.multi_az)
    .bind(cluster.status.as_str())
    .bind(&cluster.internal_id)
    .bind(&cluster.external_id)
    .bind(&cluster.identity_provider_id)
    .bind(&cluster.cluster_dns)
    .bind(Json(&cluster.available_strimzi_versions))
    .bind(cluster.schedulable)
    .bind(cluster.compute_nodes)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a cluster by id.
pub async fn get_cluster(pool: &PgPool, id: &str) -> Result<Option<ClusterRecord>> {
    let query = format!("SELECT {} FROM clusters WHERE id = $1", CLUSTER_COLUMNS);
    let cluster = sqlx::query_as::<_, ClusterRecord>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(cluster)
}

/// List live clusters.
pub async fn list_clusters(pool: &PgPool) -> Result<Vec<ClusterRecord>> {
    let query = format!(
        "SELECT {} FROM clusters WHERE deleted_at IS NULL ORDER BY created_at, id",
        CLUSTER_COLUMNS
    );
    let clusters = sqlx::query_as::<_, ClusterRecord>(&query)
        .fetch_all(pool)
        .await?;

    Ok(clusters)
}

/// Find live clusters matching placement criteria.
pub async fn find_clusters(
    pool: &PgPool,
    criteria: &ClusterCriteria,
) -> Result<Vec<ClusterRecord>> {
    let query = format!(
        r#"
        SELECT {}
        FROM clusters
        WHERE deleted_at IS NULL
          AND cloud_provider = $1
          AND region = $2
          AND multi_az = $3
          AND status = $4
        ORDER BY created_at, id
        "#,
        CLUSTER_COLUMNS
    );
    let clusters = sqlx::query_as::<_, ClusterRecord>(&query)
        .bind(&criteria.cloud_provider)
        .bind(&criteria.region)
        .bind(criteria.multi_az)
        .bind(criteria.status.as_str())
        .fetch_all(pool)
        .await?;

    Ok(clusters)
}

/// Write a cluster's mutable fields, guarded by its expected status.
pub async fn save_cluster(
    pool: &PgPool,
    cluster: &ClusterRecord,
    expected: ClusterStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE clusters
        SET status = $3,
            internal_id = $4,
            external_id = $5,
            identity_provider_id = $6,
            cluster_dns = $7,
            available_strimzi_versions = $8,
            schedulable = $9,
            compute_nodes = $10,
            updated_at = NOW()
        WHERE id = $1 AND status = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(&cluster.id)
    .bind(expected.as_str())
    .bind(cluster.status.as_str())
    .bind(&cluster.internal_id)
    .bind(&cluster.external_id)
    .bind(&cluster.identity_provider_id)
    .bind(&cluster.cluster_dns)
    .bind(Json(&cluster.available_strimzi_versions))
    .bind(cluster.schedulable)
    .bind(cluster.compute_nodes)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Tombstone a cluster.
pub async fn soft_delete_cluster(pool: &PgPool, id: &str, expected: ClusterStatus) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE clusters
        SET status = 'deleted', deleted_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(expected.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Kafka Operations
// ============================================================================

/// Insert a Kafka instance record.
pub async fn insert_kafka(pool: &PgPool, kafka: &KafkaRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kafka_requests (
            id, name, owner, organisation_id, instance_type, cloud_provider, region,
            multi_az, cluster_id, placement_id, status, bootstrap_server_host,
            failed_reason, subscription_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW())
        "#,
    )
    .bind(&kafka.id)
    .bind(&kafka.name)
    .bind(&kafka.owner)
    .bind(&kafka.organisation_id)
    .bind(kafka.instance_type.as_str())
    .bind(&kafka.cloud_provider)
    .bind(&kafka.region)
    .bind(kafka.multi_az)
    .bind(&kafka.cluster_id)
    .bind(&kafka.placement_id)
    .bind(kafka.status.as_str())
    .bind(&kafka.bootstrap_server_host)
    .bind(&kafka.failed_reason)
    .bind(&kafka.subscription_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a Kafka instance by id.
pub async fn get_kafka(pool: &PgPool, id: &str) -> Result<Option<KafkaRecord>> {
    let query = format!("SELECT {} FROM kafka_requests WHERE id = $1", KAFKA_COLUMNS);
    let kafka = sqlx::query_as::<_, KafkaRecord>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(kafka)
}

/// List live instances in a status.
pub async fn list_kafkas_by_status(pool: &PgPool, status: KafkaStatus) -> Result<Vec<KafkaRecord>> {
    let query = format!(
        r#"
        SELECT {}
        FROM kafka_requests
        WHERE status = $1 AND deleted_at IS NULL
        ORDER BY created_at, id
        "#,
        KAFKA_COLUMNS
    );
    let kafkas = sqlx::query_as::<_, KafkaRecord>(&query)
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;

    Ok(kafkas)
}

/// Write an instance's mutable fields, guarded by its expected status.
pub async fn save_kafka(pool: &PgPool, kafka: &KafkaRecord, expected: KafkaStatus) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE kafka_requests
        SET status = $3,
            cluster_id = $4,
            placement_id = $5,
            bootstrap_server_host = $6,
            failed_reason = $7,
            subscription_id = $8,
            updated_at = NOW()
        WHERE id = $1 AND status = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(&kafka.id)
    .bind(expected.as_str())
    .bind(kafka.status.as_str())
    .bind(&kafka.cluster_id)
    .bind(&kafka.placement_id)
    .bind(&kafka.bootstrap_server_host)
    .bind(&kafka.failed_reason)
    .bind(&kafka.subscription_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Tombstone an instance.
pub async fn soft_delete_kafka(pool: &PgPool, id: &str, expected: KafkaStatus) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE kafka_requests
        SET status = 'deleted', deleted_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(expected.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count non-deleted instances per cluster.
pub async fn count_kafkas_by_cluster(
    pool: &PgPool,
    cluster_ids: &[String],
) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT cluster_id, COUNT(*)
        FROM kafka_requests
        WHERE cluster_id = ANY($1)
          AND status NOT IN ('deleting', 'deleted')
          AND deleted_at IS NULL
        GROUP BY cluster_id
        "#,
    )
    .bind(cluster_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Count an organisation's placed, active instances.
pub async fn count_kafkas_by_organisation(pool: &PgPool, organisation_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM kafka_requests
        WHERE organisation_id = $1
          AND status NOT IN ('accepted', 'failed', 'deleted')
          AND deleted_at IS NULL
        "#,
    )
    .bind(organisation_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// List instances past their lifespan.
pub async fn list_expired_kafkas(
    pool: &PgPool,
    instance_type: InstanceType,
    created_before: DateTime<Utc>,
) -> Result<Vec<KafkaRecord>> {
    let query = format!(
        r#"
        SELECT {}
        FROM kafka_requests
        WHERE instance_type = $1
          AND created_at < $2
          AND status NOT IN ('deleting', 'deleted', 'failed')
          AND deleted_at IS NULL
        ORDER BY created_at, id
        "#,
        KAFKA_COLUMNS
    );
    let kafkas = sqlx::query_as::<_, KafkaRecord>(&query)
        .bind(instance_type.as_str())
        .bind(created_before)
        .fetch_all(pool)
        .await?;

    Ok(kafkas)
}

// ============================================================================
// Status Report Operations
// ============================================================================

/// Replace the latest report for an instance.
pub async fn upsert_kafka_status_report(pool: &PgPool, report: &KafkaStatusReport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kafka_status_reports
            (kafka_id, cluster_id, condition, reason, message, placement_id, reported_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (kafka_id) DO UPDATE
        SET cluster_id = EXCLUDED.cluster_id,
            condition = EXCLUDED.condition,
            reason = EXCLUDED.reason,
            message = EXCLUDED.message,
            placement_id = EXCLUDED.placement_id,
            reported_at = EXCLUDED.reported_at
        "#,
    )
    .bind(&report.kafka_id)
    .bind(&report.cluster_id)
    .bind(report.condition.as_str())
    .bind(&report.reason)
    .bind(&report.message)
    .bind(&report.placement_id)
    .bind(report.reported_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the latest report for an instance.
pub async fn get_kafka_status_report(
    pool: &PgPool,
    kafka_id: &str,
) -> Result<Option<KafkaStatusReport>> {
    let report = sqlx::query_as::<_, KafkaStatusReport>(
        r#"
        SELECT kafka_id, cluster_id, condition, reason, message, placement_id, reported_at
        FROM kafka_status_reports
        WHERE kafka_id = $1
        "#,
    )
    .bind(kafka_id)
    .fetch_optional(pool)
    .await?;

    Ok(report)
}

/// Replace the latest report for a cluster.
pub async fn upsert_cluster_status_report(
    pool: &PgPool,
    report: &ClusterStatusReport,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cluster_status_reports (cluster_id, ready, strimzi_versions, reported_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (cluster_id) DO UPDATE
        SET ready = EXCLUDED.ready,
            strimzi_versions = EXCLUDED.strimzi_versions,
            reported_at = EXCLUDED.reported_at
        "#,
    )
    .bind(&report.cluster_id)
    .bind(report.ready)
    .bind(Json(&report.strimzi_versions))
    .bind(report.reported_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the latest report for a cluster.
pub async fn get_cluster_status_report(
    pool: &PgPool,
    cluster_id: &str,
) -> Result<Option<ClusterStatusReport>> {
    let report = sqlx::query_as::<_, ClusterStatusReport>(
        r#"
        SELECT cluster_id, ready, strimzi_versions, reported_at
        FROM cluster_status_reports
        WHERE cluster_id = $1
        "#,
    )
    .bind(cluster_id)
    .fetch_optional(pool)
    .await?;

    Ok(report)
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn try_acquire_lease(
        &self,
        lease_type: &str,
        leader: &str,
        ttl: Duration,
    ) -> Result<bool> {
        try_acquire_lease(&self.pool, lease_type, leader, ttl).await
    }

    async fn release_lease(&self, lease_type: &str, leader: &str) -> Result<()> {
        release_lease(&self.pool, lease_type, leader).await
    }

    async fn get_lease(&self, lease_type: &str) -> Result<Option<LeaseRecord>> {
        get_lease(&self.pool, lease_type).await
    }

    async fn insert_cluster(&self, cluster: &ClusterRecord) -> Result<()> {
        insert_cluster(&self.pool, cluster).await
    }

    async fn get_cluster(&self, id: &str) -> Result<Option<ClusterRecord>> {
        get_cluster(&self.pool, id).await
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>> {
        list_clusters(&self.pool).await
    }

    async fn find_clusters(&self, criteria: &ClusterCriteria) -> Result<Vec<ClusterRecord>> {
        find_clusters(&self.pool, criteria).await
    }

    async fn save_cluster(&self, cluster: &ClusterRecord, expected: ClusterStatus) -> Result<bool> {
        save_cluster(&self.pool, cluster, expected).await
    }

    async fn soft_delete_cluster(&self, id: &str, expected: ClusterStatus) -> Result<bool> {
        soft_delete_cluster(&self.pool, id, expected).await
    }

    async fn insert_kafka(&self, kafka: &KafkaRecord) -> Result<()> {
        insert_kafka(&self.pool, kafka).await
    }

    async fn get_kafka(&self, id: &str) -> Result<Option<KafkaRecord>> {
        get_kafka(&self.pool, id).await
    }

    async fn list_kafkas_by_status(&self, status: KafkaStatus) -> Result<Vec<KafkaRecord>> {
        list_kafkas_by_status(&self.pool, status).await
    }

    async fn save_kafka(&self, kafka: &KafkaRecord, expected: KafkaStatus) -> Result<bool> {
        save_kafka(&self.pool, kafka, expected).await
    }

    async fn soft_delete_kafka(&self, id: &str, expected: KafkaStatus) -> Result<bool> {
        soft_delete_kafka(&self.pool, id, expected).await
    }

    async fn count_kafkas_by_cluster(
        &self,
        cluster_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        count_kafkas_by_cluster(&self.pool, cluster_ids).await
    }

    async fn count_kafkas_by_organisation(&self, organisation_id: &str) -> Result<i64> {
        count_kafkas_by_organisation(&self.pool, organisation_id).await
    }

    async fn list_expired_kafkas(
        &self,
        instance_type: InstanceType,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<KafkaRecord>> {
        list_expired_kafkas(&self.pool, instance_type, created_before).await
    }

    async fn upsert_kafka_status_report(&self, report: &KafkaStatusReport) -> Result<()> {
        upsert_kafka_status_report(&self.pool, report).await
    }

    async fn get_kafka_status_report(&self, kafka_id: &str) -> Result<Option<KafkaStatusReport>> {
        get_kafka_status_report(&self.pool, kafka_id).await
    }

    async fn upsert_cluster_status_report(&self, report: &ClusterStatusReport) -> Result<()> {
        upsert_cluster_status_report(&self.pool, report).await
    }

    async fn get_cluster_status_report(
        &self,
        cluster_id: &str,
    ) -> Result<Option<ClusterStatusReport>> {
        get_cluster_status_report(&self.pool, cluster_id).await
    }
}
