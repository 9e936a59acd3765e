// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for signal delivery between state changes and workers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, manual_cluster, manual_dataplane, new_kafka};
use fleet_manager::cluster::CLUSTER_TOPIC;
use fleet_manager::kafka::{
    KAFKA_ACCEPTED_TOPIC, KAFKA_DELETING_TOPIC, KAFKA_PROVISIONING_TOPIC, KAFKA_READY_TOPIC,
};
use fleet_manager::model::{ConditionStatus, KafkaStatus, ProviderKind};
use fleet_manager::persistence::Persistence;
use fleet_manager::services::{ClusterStatusUpdate, FleetService, KafkaStatusUpdate};
use fleet_manager::signal::{InMemorySignalBus, SignalBus};

fn harness() -> Harness {
    Harness::new(manual_dataplane(vec![manual_cluster("c1", 3)]))
}

// ============================================================================
// Bus semantics
// ============================================================================

#[tokio::test]
async fn test_concurrent_notifiers_wake_waiter_once() {
    let bus = Arc::new(InMemorySignalBus::new());
    let sub = bus.subscribe("reconcile:test");

    let mut notifiers = Vec::new();
    for _ in 0..16 {
        let bus = bus.clone();
        notifiers.push(tokio::spawn(async move { bus.notify("reconcile:test").await }));
    }
    for notifier in notifiers {
        notifier.await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(1), sub.signaled())
        .await
        .expect("waiter should be woken");
    // Sixteen notifications collapse into one pending wake-up.
    assert!(!sub.is_signaled());
}

#[tokio::test]
async fn test_notify_without_subscribers_is_noop() {
    let bus = InMemorySignalBus::new();
    bus.notify("reconcile:nobody").await;
    assert_eq!(bus.topic_count(), 0);
}

// ============================================================================
// Service signals
// ============================================================================

#[tokio::test]
async fn test_register_signals_accepted_worker() {
    let h = harness();
    let accepted = h.bus.subscribe(KAFKA_ACCEPTED_TOPIC);
    let service = FleetService::new(h.ctx.clone());

    service
        .register_kafka(new_kafka("orders", "org-1"))
        .await
        .unwrap();

    assert!(accepted.is_signaled());
}

#[tokio::test]
async fn test_failed_write_sends_no_signal() {
    let h = harness();
    let accepted = h.bus.subscribe(KAFKA_ACCEPTED_TOPIC);
    let service = FleetService::new(h.ctx.clone());

    h.store.set_unavailable(true);
    assert!(
        service
            .register_kafka(new_kafka("orders", "org-1"))
            .await
            .is_err()
    );
    assert!(!accepted.is_signaled());
}

#[tokio::test]
async fn test_status_report_signals_provisioning_and_ready_workers() {
    let h = harness();
    h.ready_cluster("c1", ProviderKind::Standalone).await;
    let mut kafka = h.accepted_kafka("k1", "org-1").await;
    kafka.cluster_id = Some("c1".to_string());
    h.store
        .save_kafka(&kafka, KafkaStatus::Accepted)
        .await
        .unwrap();

    let provisioning = h.bus.subscribe(KAFKA_PROVISIONING_TOPIC);
    let ready = h.bus.subscribe(KAFKA_READY_TOPIC);
    let service = FleetService::new(h.ctx.clone());

    service
        .ingest_kafka_status(
            "c1",
            "k1",
            KafkaStatusUpdate {
                condition: ConditionStatus::True,
                reason: None,
                message: None,
            },
        )
        .await
        .unwrap();

    assert!(provisioning.is_signaled());
    assert!(ready.is_signaled());
}

#[tokio::test]
async fn test_cluster_report_signals_cluster_worker() {
    let h = harness();
    h.ready_cluster("c1", ProviderKind::Standalone).await;
    let cluster = h.bus.subscribe(CLUSTER_TOPIC);
    let service = FleetService::new(h.ctx.clone());

    service
        .ingest_cluster_status(
            "c1",
            ClusterStatusUpdate {
                ready: true,
                strimzi_versions: Vec::new(),
            },
        )
        .await
        .unwrap();

    assert!(cluster.is_signaled());
}

#[tokio::test]
async fn test_deletion_request_signals_deleting_worker_once() {
    let h = harness();
    h.accepted_kafka("k1", "org-1").await;
    let deleting = h.bus.subscribe(KAFKA_DELETING_TOPIC);
    let service = FleetService::new(h.ctx.clone());

    service.request_deletion("k1").await.unwrap();
    assert!(deleting.is_signaled());

    // Already deleting: no write, no signal.
    service.request_deletion("k1").await.unwrap();
    assert!(!deleting.is_signaled());
}
