// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence backend.
//!
//! Used by tests and single-process setups. Time comes from an injected
//! [`Clock`], so lease expiry can be driven by a [`crate::clock::ManualClock`].
//! Handles obtained through [`MemoryPersistence::replica`] share the stored
//! data but carry their own availability switch, which lets a test cut one
//! simulated replica off from the store while the others keep working.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Persistence;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{
    ClusterCriteria, ClusterRecord, ClusterStatus, ClusterStatusReport, InstanceType,
    KafkaRecord, KafkaStatus, KafkaStatusReport, LeaseRecord,
};

#[derive(Default)]
struct State {
    leases: HashMap<String, LeaseRecord>,
    clusters: Vec<ClusterRecord>,
    kafkas: Vec<KafkaRecord>,
    kafka_reports: HashMap<String, KafkaStatusReport>,
    cluster_reports: HashMap<String, ClusterStatusReport>,
}

/// In-memory [`Persistence`] implementation.
#[derive(Clone)]
pub struct MemoryPersistence {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersistence {
    /// Empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another handle on the same data with an independent availability switch.
    pub fn replica(&self) -> Self {
        Self {
            state: self.state.clone(),
            clock: self.clock.clone(),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every call through this handle fail as if the pool timed out.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

fn sorted<T: Clone>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(key);
    items
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn try_acquire_lease(
        &self,
        lease_type: &str,
        leader: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Other(format!("Invalid lease TTL: {}", e)))?;
        let mut state = self.lock()?;

        let lease = state
            .leases
            .entry(lease_type.to_string())
            .or_insert_with(|| LeaseRecord {
                id: Uuid::new_v4().to_string(),
                lease_type: lease_type.to_string(),
                leader: String::new(),
                expires_at: None,
            });

        let available = lease.leader == leader || lease.expires_at.is_none_or(|at| at <= now);
        if !available {
            return Ok(false);
        }

        lease.leader = leader.to_string();
        lease.expires_at = Some(now + ttl);
        Ok(true)
    }

    async fn release_lease(&self, lease_type: &str, leader: &str) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        if let Some(lease) = state.leases.get_mut(lease_type)
            && lease.leader == leader
        {
            lease.expires_at = Some(now);
        }
        Ok(())
    }

    async fn get_lease(&self, lease_type: &str) -> Result<Option<LeaseRecord>> {
        Ok(self.lock()?.leases.get(lease_type).cloned())
    }

    async fn insert_cluster(&self, cluster: &ClusterRecord) -> Result<()> {
        let mut state = self.lock()?;
        if state.clusters.iter().any(|c| c.id == cluster.id) {
            return Err(Error::InvalidRequest(format!(
                "cluster {} already exists",
                cluster.id
            )));
        }
        state.clusters.push(cluster.clone());
        Ok(())
    }

    async fn get_cluster(&self, id: &str) -> Result<Option<ClusterRecord>> {
        Ok(self.lock()?.clusters.iter().find(|c| c.id == id).cloned())
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>> {
        let state = self.lock()?;
        Ok(sorted(
            state
                .clusters
                .iter()
                .filter(|c| c.deleted_at.is_none())
                .cloned(),
            |c| c.created_at,
        ))
    }

    async fn find_clusters(&self, criteria: &ClusterCriteria) -> Result<Vec<ClusterRecord>> {
        let state = self.lock()?;
        Ok(sorted(
            state
                .clusters
                .iter()
                .filter(|c| c.deleted_at.is_none() && criteria.matches(c))
                .cloned(),
            |c| c.created_at,
        ))
    }

    async fn save_cluster(&self, cluster: &ClusterRecord, expected: ClusterStatus) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let Some(stored) = state
            .clusters
            .iter_mut()
            .find(|c| c.id == cluster.id && c.deleted_at.is_none())
        else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }

        let created_at = stored.created_at;
        *stored = cluster.clone();
        stored.created_at = created_at;
        stored.updated_at = now;
        stored.deleted_at = None;
        Ok(true)
    }

    async fn soft_delete_cluster(&self, id: &str, expected: ClusterStatus) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        match state
            .clusters
            .iter_mut()
            .find(|c| c.id == id && c.deleted_at.is_none() && c.status == expected)
        {
            Some(stored) => {
                stored.status = ClusterStatus::Deleted;
                stored.updated_at = now;
                stored.deleted_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_kafka(&self, kafka: &KafkaRecord) -> Result<()> {
        let mut state = self.lock()?;
        if state.kafkas.iter().any(|k| k.id == kafka.id) {
            return Err(Error::InvalidRequest(format!(
                "kafka {} already exists",
                kafka.id
            )));
        }
        state.kafkas.push(kafka.clone());
        Ok(())
    }

    async fn get_kafka(&self, id: &str) -> Result<Option<KafkaRecord>> {
        Ok(self.lock()?.kafkas.iter().find(|k| k.id == id).cloned())
    }

    async fn list_kafkas_by_status(&self, status: KafkaStatus) -> Result<Vec<KafkaRecord>> {
        let state = self.lock()?;
        Ok(sorted(
            state
                .kafkas
                .iter()
                .filter(|k| k.deleted_at.is_none() && k.status == status)
                .cloned(),
            |k| k.created_at,
        ))
    }

    async fn save_kafka(&self, kafka: &KafkaRecord, expected: KafkaStatus) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let Some(stored) = state
            .kafkas
            .iter_mut()
            .find(|k| k.id == kafka.id && k.deleted_at.is_none())
        else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }

        let created_at = stored.created_at;
        *stored = kafka.clone();
        stored.created_at = created_at;
        stored.updated_at = now;
        stored.deleted_at = None;
        Ok(true)
    }

    async fn soft_delete_kafka(&self, id: &str, expected: KafkaStatus) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        match state
            .kafkas
            .iter_mut()
            .find(|k| k.id == id && k.deleted_at.is_none() && k.status == expected)
        {
            Some(stored) => {
                stored.status = KafkaStatus::Deleted;
                stored.updated_at = now;
                stored.deleted_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_kafkas_by_cluster(
        &self,
        cluster_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        let state = self.lock()?;
        let mut counts = HashMap::new();
        for kafka in &state.kafkas {
            if kafka.deleted_at.is_some()
                || matches!(kafka.status, KafkaStatus::Deleting | KafkaStatus::Deleted)
            {
                continue;
            }
            if let Some(cluster_id) = &kafka.cluster_id
                && cluster_ids.contains(cluster_id)
            {
                *counts.entry(cluster_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn count_kafkas_by_organisation(&self, organisation_id: &str) -> Result<i64> {
        let state = self.lock()?;
        let count = state
            .kafkas
            .iter()
            .filter(|k| {
                k.organisation_id == organisation_id
                    && k.deleted_at.is_none()
                    && !matches!(
                        k.status,
                        KafkaStatus::Accepted | KafkaStatus::Failed | KafkaStatus::Deleted
                    )
            })
            .count();
        Ok(count as i64)
    }

    async fn list_expired_kafkas(
        &self,
        instance_type: InstanceType,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<KafkaRecord>> {
        let state = self.lock()?;
        Ok(sorted(
            state
                .kafkas
                .iter()
                .filter(|k| {
                    k.deleted_at.is_none()
                        && k.instance_type == instance_type
                        && k.created_at < created_before
                        && !matches!(
                            k.status,
                            KafkaStatus::Deleting | KafkaStatus::Deleted | KafkaStatus::Failed
                        )
                })
                .cloned(),
            |k| k.created_at,
        ))
    }

    async fn upsert_kafka_status_report(&self, report: &KafkaStatusReport) -> Result<()> {
        self.lock()?
            .kafka_reports
            .insert(report.kafka_id.clone(), report.clone());
        Ok(())
    }

    async fn get_kafka_status_report(&self, kafka_id: &str) -> Result<Option<KafkaStatusReport>> {
        Ok(self.lock()?.kafka_reports.get(kafka_id).cloned())
    }

    async fn upsert_cluster_status_report(&self, report: &ClusterStatusReport) -> Result<()> {
        self.lock()?
            .cluster_reports
            .insert(report.cluster_id.clone(), report.clone());
        Ok(())
    }

    async fn get_cluster_status_report(
        &self,
        cluster_id: &str,
    ) -> Result<Option<ClusterStatusReport>> {
        Ok(self.lock()?.cluster_reports.get(cluster_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{NewKafka, ProviderKind};

    fn kafka(id: &str, org: &str, now: DateTime<Utc>) -> KafkaRecord {
        KafkaRecord::accepted(
            id,
            NewKafka {
                name: format!("name-{}", id),
                owner: "owner".to_string(),
                organisation_id: org.to_string(),
                instance_type: InstanceType::Standard,
                cloud_provider: "aws".to_string(),
                region: "us-east-1".to_string(),
                multi_az: true,
            },
            now,
        )
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_expiry() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryPersistence::with_clock(clock.clone());
        let ttl = Duration::from_secs(30);

        assert!(store.try_acquire_lease("l", "a", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("l", "b", ttl).await.unwrap());
        // Renewal by the holder.
        assert!(store.try_acquire_lease("l", "a", ttl).await.unwrap());

        clock.advance(Duration::from_secs(30));
        assert!(store.try_acquire_lease("l", "b", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("l", "a", ttl).await.unwrap());

        let lease = store.get_lease("l").await.unwrap().unwrap();
        assert_eq!(lease.leader, "b");
    }

    #[tokio::test]
    async fn test_release_lease_only_by_holder() {
        let store = MemoryPersistence::new();
        let ttl = Duration::from_secs(30);

        assert!(store.try_acquire_lease("l", "a", ttl).await.unwrap());
        store.release_lease("l", "b").await.unwrap();
        assert!(!store.try_acquire_lease("l", "b", ttl).await.unwrap());

        store.release_lease("l", "a").await.unwrap();
        assert!(store.try_acquire_lease("l", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_replica_fault_injection_is_independent() {
        let store = MemoryPersistence::new();
        let replica = store.replica();

        replica.set_unavailable(true);
        assert!(matches!(
            replica.get_lease("l").await,
            Err(Error::Database(sqlx::Error::PoolTimedOut))
        ));
        assert!(store.get_lease("l").await.is_ok());

        replica.set_unavailable(false);
        assert!(replica.get_lease("l").await.is_ok());
    }

    #[tokio::test]
    async fn test_save_kafka_is_guarded_by_status() {
        let store = MemoryPersistence::new();
        let mut record = kafka("k1", "org", Utc::now());
        store.insert_kafka(&record).await.unwrap();

        record.status = KafkaStatus::Preparing;
        assert!(
            store
                .save_kafka(&record, KafkaStatus::Accepted)
                .await
                .unwrap()
        );
        // Second writer with a stale expectation loses.
        assert!(
            !store
                .save_kafka(&record, KafkaStatus::Accepted)
                .await
                .unwrap()
        );

        let stored = store.get_kafka("k1").await.unwrap().unwrap();
        assert_eq!(stored.status, KafkaStatus::Preparing);
    }

    #[tokio::test]
    async fn test_counts_skip_deleting_and_deleted_instances() {
        let store = MemoryPersistence::new();
        let now = Utc::now();

        let mut on_a = kafka("k1", "org", now);
        on_a.cluster_id = Some("a".to_string());
        on_a.status = KafkaStatus::Provisioning;
        store.insert_kafka(&on_a).await.unwrap();
        store.insert_kafka(&kafka("k3", "org", now)).await.unwrap();

        let mut deleted = kafka("k2", "org", now);
        deleted.cluster_id = Some("a".to_string());
        deleted.status = KafkaStatus::Deleting;
        store.insert_kafka(&deleted).await.unwrap();
        assert!(
            store
                .soft_delete_kafka("k2", KafkaStatus::Deleting)
                .await
                .unwrap()
        );

        let mut draining = kafka("k4", "other", now);
        draining.cluster_id = Some("a".to_string());
        draining.status = KafkaStatus::Deleting;
        store.insert_kafka(&draining).await.unwrap();

        let counts = store
            .count_kafkas_by_cluster(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(counts.get("a"), Some(&1));
        assert_eq!(counts.get("b"), None);
        assert_eq!(store.count_kafkas_by_organisation("org").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_clusters_in_creation_order() {
        let store = MemoryPersistence::new();
        let now = Utc::now();
        for (id, offset) in [("late", 10), ("early", 0), ("other-region", 5)] {
            let region = if id == "other-region" {
                "eu-west-1"
            } else {
                "us-east-1"
            };
            let cluster = ClusterRecord::new(
                id,
                ProviderKind::Standalone,
                "aws",
                region,
                true,
                ClusterStatus::Ready,
                now + chrono::Duration::seconds(offset),
            );
            store.insert_cluster(&cluster).await.unwrap();
        }

        let found = store
            .find_clusters(&ClusterCriteria {
                cloud_provider: "aws".to_string(),
                region: "us-east-1".to_string(),
                multi_az: true,
                status: ClusterStatus::Ready,
            })
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
