// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests: a full runtime on the in-memory store.
//!
//! Requests go through [`FleetService`] and every transition is made by the
//! workers the elected leader runs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{manual_cluster, manual_dataplane, new_kafka};
use fleet_manager::config::LeaderElectionConfig;
use fleet_manager::model::{ConditionStatus, KafkaRecord, KafkaStatus};
use fleet_manager::persistence::{MemoryPersistence, Persistence};
use fleet_manager::runtime::FleetRuntime;
use fleet_manager::services::{FleetService, KafkaStatusUpdate};

async fn start_runtime(store: MemoryPersistence, identity: &str) -> FleetRuntime {
    FleetRuntime::builder()
        .persistence(Arc::new(store))
        .dataplane(manual_dataplane(vec![manual_cluster("c1", 3)]))
        .leader_election(LeaderElectionConfig {
            lease_type: "worker_leader".to_string(),
            poll_interval: Duration::from_millis(20),
            lease_ttl: Duration::from_secs(2),
        })
        .worker_poll_interval(Duration::from_millis(50))
        .identity(identity)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap()
}

async fn kafkas(service: &FleetService, ids: &[String]) -> Vec<KafkaRecord> {
    let mut records = Vec::new();
    for id in ids {
        records.push(service.get_kafka(id).await.unwrap());
    }
    records
}

/// Poll until `check` holds for the given instances.
async fn eventually(
    service: &FleetService,
    ids: &[String],
    check: impl Fn(&[KafkaRecord]) -> bool,
) -> Vec<KafkaRecord> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let records = kafkas(service, ids).await;
            if check(&records) {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("fleet did not converge in time")
}

fn placed(records: &[KafkaRecord]) -> usize {
    records
        .iter()
        .filter(|k| k.cluster_id.as_deref() == Some("c1"))
        .count()
}

#[tokio::test]
async fn test_cluster_limit_caps_placement() {
    let store = MemoryPersistence::new();
    let runtime = start_runtime(store.clone(), "replica-a").await;
    let service = runtime.service();

    let mut ids = Vec::new();
    for i in 0..4 {
        let kafka = service
            .register_kafka(new_kafka(&format!("kafka-{i}"), "org-1"))
            .await
            .unwrap();
        assert_eq!(kafka.status, KafkaStatus::Accepted);
        ids.push(kafka.id);
    }

    let records = eventually(&service, &ids, |records| {
        placed(records) == 3
            && records
                .iter()
                .filter(|k| k.status == KafkaStatus::Provisioning)
                .count()
                == 3
    })
    .await;

    let waiting: Vec<&KafkaRecord> = records
        .iter()
        .filter(|k| k.status == KafkaStatus::Accepted)
        .collect();
    assert_eq!(waiting.len(), 1);
    assert!(waiting[0].cluster_id.is_none());

    for kafka in records.iter().filter(|k| k.cluster_id.is_some()) {
        let host = kafka.bootstrap_server_host.as_deref().unwrap();
        assert!(host.ends_with(".apps.c1.example.com"), "unexpected host {host}");
    }

    // The configured cluster was registered by the cluster worker.
    let cluster = store.get_cluster("c1").await.unwrap().unwrap();
    assert_eq!(cluster.cloud_provider, "aws");
    assert_eq!(cluster.region, "us-east-1");
    assert!(cluster.multi_az);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_instance_lifecycle_frees_capacity() {
    let store = MemoryPersistence::new();
    let runtime = start_runtime(store, "replica-a").await;
    let service = runtime.service();

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(
            service
                .register_kafka(new_kafka(&format!("kafka-{i}"), "org-1"))
                .await
                .unwrap()
                .id,
        );
    }
    let records = eventually(&service, &ids, |records| {
        records
            .iter()
            .filter(|k| k.status == KafkaStatus::Provisioning)
            .count()
            == 3
    })
    .await;
    let first = records
        .iter()
        .find(|k| k.status == KafkaStatus::Provisioning)
        .unwrap()
        .id
        .clone();
    let waiting = records
        .iter()
        .find(|k| k.status == KafkaStatus::Accepted)
        .unwrap()
        .id
        .clone();

    // Data plane reports the instance ready.
    service
        .ingest_kafka_status(
            "c1",
            &first,
            KafkaStatusUpdate {
                condition: ConditionStatus::True,
                reason: None,
                message: None,
            },
        )
        .await
        .unwrap();
    eventually(&service, std::slice::from_ref(&first), |r| {
        r[0].status == KafkaStatus::Ready
    })
    .await;

    // Deleting it frees a slot for the waiting instance.
    service.request_deletion(&first).await.unwrap();
    let done = eventually(&service, &[first.clone(), waiting.clone()], |r| {
        r[0].status == KafkaStatus::Deleted && r[1].cluster_id.as_deref() == Some("c1")
    })
    .await;
    assert!(done[0].deleted_at.is_some());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_replica_takes_over_after_shutdown() {
    let store = MemoryPersistence::new();
    let a = start_runtime(store.replica(), "replica-a").await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !a.leader().is_leader() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first replica never led");

    let b = start_runtime(store.replica(), "replica-b").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!b.leader().is_leader());

    a.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !b.leader().is_leader() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second replica never took over");

    // The new leader's workers pick up requests.
    let service = b.service();
    let id = service
        .register_kafka(new_kafka("after-failover", "org-1"))
        .await
        .unwrap()
        .id;
    eventually(&service, std::slice::from_ref(&id), |r| {
        r[0].cluster_id.is_some()
    })
    .await;

    b.shutdown().await.unwrap();
}
