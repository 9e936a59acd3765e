// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metric events emitted by the workers.
//!
//! The transport is up to the embedding application; [`TracingMetrics`] writes
//! each event as a structured log line.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::info;

use crate::model::{ClusterRecord, ClusterStatus, KafkaRecord};

/// Receiver of metric events.
pub trait MetricsRecorder: Send + Sync {
    /// An instance became ready `elapsed` after creation.
    fn kafka_ready(&self, kafka: &KafkaRecord, elapsed: Duration);

    /// An instance failed.
    fn kafka_failed(&self, kafka: &KafkaRecord);

    /// A cluster moved to `status`.
    fn cluster_status(&self, cluster: &ClusterRecord, status: ClusterStatus);

    /// A reconciliation pass finished.
    fn reconcile_pass(&self, worker_type: &str, elapsed: Duration, errors: usize);
}

/// Logs metric events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsRecorder for TracingMetrics {
    fn kafka_ready(&self, kafka: &KafkaRecord, elapsed: Duration) {
        info!(
            metric = "kafka_create_duration",
            kafka_id = %kafka.id,
            cluster_id = ?kafka.cluster_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Kafka instance ready"
        );
    }

    fn kafka_failed(&self, kafka: &KafkaRecord) {
        info!(
            metric = "kafka_operations_failed",
            kafka_id = %kafka.id,
            reason = ?kafka.failed_reason,
            "Kafka instance failed"
        );
    }

    fn cluster_status(&self, cluster: &ClusterRecord, status: ClusterStatus) {
        info!(
            metric = "cluster_status",
            cluster_id = %cluster.id,
            provider_type = %cluster.provider_type,
            status = %status,
            "Cluster status recorded"
        );
    }

    fn reconcile_pass(&self, worker_type: &str, elapsed: Duration, errors: usize) {
        tracing::debug!(
            metric = "reconciler_duration",
            worker_type,
            elapsed_ms = elapsed.as_millis() as u64,
            errors,
            "Reconcile pass finished"
        );
    }
}

/// Counts metric events, for tests.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    ready: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
    cluster_transitions: Mutex<Vec<(String, ClusterStatus)>>,
    passes: Mutex<HashMap<String, usize>>,
}

impl CountingMetrics {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// IDs of instances reported ready, in order.
    pub fn ready(&self) -> Vec<String> {
        lock(&self.ready).clone()
    }

    /// IDs of instances reported failed, in order.
    pub fn failed(&self) -> Vec<String> {
        lock(&self.failed).clone()
    }

    /// Cluster transitions reported, in order.
    pub fn cluster_transitions(&self) -> Vec<(String, ClusterStatus)> {
        lock(&self.cluster_transitions).clone()
    }

    /// Passes reported for `worker_type`.
    pub fn passes(&self, worker_type: &str) -> usize {
        lock(&self.passes).get(worker_type).copied().unwrap_or(0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MetricsRecorder for CountingMetrics {
    fn kafka_ready(&self, kafka: &KafkaRecord, _elapsed: Duration) {
        lock(&self.ready).push(kafka.id.clone());
    }

    fn kafka_failed(&self, kafka: &KafkaRecord) {
        lock(&self.failed).push(kafka.id.clone());
    }

    fn cluster_status(&self, cluster: &ClusterRecord, status: ClusterStatus) {
        lock(&self.cluster_transitions).push((cluster.id.clone(), status));
    }

    fn reconcile_pass(&self, worker_type: &str, _elapsed: Duration, _errors: usize) {
        *lock(&self.passes).entry(worker_type.to_string()).or_insert(0) += 1;
    }
}
