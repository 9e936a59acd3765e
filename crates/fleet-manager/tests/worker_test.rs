// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the reconcile loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_manager::Error;
use fleet_manager::metrics::CountingMetrics;
use fleet_manager::signal::{InMemorySignalBus, SignalBus};
use fleet_manager::worker::{Reconciler, Worker};

const TOPIC: &str = "reconcile:scripted";

/// Records how many passes ran and how many overlapped.
#[derive(Default)]
struct ScriptedReconciler {
    passes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pass_duration: Duration,
    panic_first: AtomicBool,
}

impl ScriptedReconciler {
    fn slow(pass_duration: Duration) -> Self {
        Self {
            pass_duration,
            ..Self::default()
        }
    }

    fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reconciler for ScriptedReconciler {
    fn worker_type(&self) -> &'static str {
        "scripted"
    }

    fn topic(&self) -> &'static str {
        TOPIC
    }

    async fn reconcile(&self) -> Vec<Error> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.passes.fetch_add(1, Ordering::SeqCst);

        if self.panic_first.swap(false, Ordering::SeqCst) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            panic!("scripted pass failed");
        }

        tokio::time::sleep(self.pass_duration).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Vec::new()
    }
}

fn worker(
    reconciler: Arc<ScriptedReconciler>,
    bus: Arc<InMemorySignalBus>,
    metrics: Arc<CountingMetrics>,
    poll_interval: Duration,
) -> Worker {
    Worker::new(reconciler, bus, metrics, poll_interval)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Wake-up
// ============================================================================

#[tokio::test]
async fn test_signal_wakes_worker_before_poll_interval() {
    let bus = Arc::new(InMemorySignalBus::new());
    let reconciler = Arc::new(ScriptedReconciler::default());
    let worker = worker(
        reconciler.clone(),
        bus.clone(),
        Arc::new(CountingMetrics::new()),
        Duration::from_secs(3600),
    );

    worker.start().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(reconciler.passes(), 0);

    bus.notify(TOPIC).await;
    let scripted = reconciler.clone();
    wait_for(move || scripted.passes() == 1).await;

    worker.stop().await;
}

#[tokio::test]
async fn test_poll_interval_runs_passes_without_signals() {
    let reconciler = Arc::new(ScriptedReconciler::default());
    let worker = worker(
        reconciler.clone(),
        Arc::new(InMemorySignalBus::new()),
        Arc::new(CountingMetrics::new()),
        Duration::from_millis(10),
    );

    worker.start().await;
    let scripted = reconciler.clone();
    wait_for(move || scripted.passes() >= 3).await;
    worker.stop().await;
}

// ============================================================================
// Non-overlap
// ============================================================================

#[tokio::test]
async fn test_passes_never_overlap() {
    let bus = Arc::new(InMemorySignalBus::new());
    let reconciler = Arc::new(ScriptedReconciler::slow(Duration::from_millis(30)));
    let worker = worker(
        reconciler.clone(),
        bus.clone(),
        Arc::new(CountingMetrics::new()),
        Duration::from_millis(5),
    );

    worker.start().await;
    for _ in 0..20 {
        bus.notify(TOPIC).await;
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    let scripted = reconciler.clone();
    wait_for(move || scripted.passes() >= 3).await;
    worker.stop().await;

    assert_eq!(reconciler.max_active.load(Ordering::SeqCst), 1);
    // Signals raised during a pass collapse into one follow-up pass.
    assert!(reconciler.passes() < 20);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_pass() {
    let bus = Arc::new(InMemorySignalBus::new());
    let reconciler = Arc::new(ScriptedReconciler::slow(Duration::from_millis(50)));
    let worker = worker(
        reconciler.clone(),
        bus.clone(),
        Arc::new(CountingMetrics::new()),
        Duration::from_secs(3600),
    );

    worker.start().await;
    bus.notify(TOPIC).await;
    let scripted = reconciler.clone();
    wait_for(move || scripted.active.load(Ordering::SeqCst) == 1).await;

    worker.stop().await;
    assert_eq!(reconciler.active.load(Ordering::SeqCst), 0);
    assert!(!worker.is_running().await);
}

// ============================================================================
// Panic containment
// ============================================================================

#[tokio::test]
async fn test_panicking_pass_does_not_kill_worker() {
    let bus = Arc::new(InMemorySignalBus::new());
    let metrics = Arc::new(CountingMetrics::new());
    let reconciler = Arc::new(ScriptedReconciler::default());
    reconciler.panic_first.store(true, Ordering::SeqCst);
    let worker = worker(
        reconciler.clone(),
        bus.clone(),
        metrics.clone(),
        Duration::from_secs(3600),
    );

    worker.start().await;
    bus.notify(TOPIC).await;
    let scripted = reconciler.clone();
    wait_for(move || scripted.passes() == 1).await;
    let counted = metrics.clone();
    wait_for(move || counted.passes("scripted") == 1).await;
    assert!(worker.is_running().await);

    bus.notify(TOPIC).await;
    let scripted = reconciler.clone();
    wait_for(move || scripted.passes() == 2).await;
    let counted = metrics.clone();
    wait_for(move || counted.passes("scripted") == 2).await;

    worker.stop().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let bus = Arc::new(InMemorySignalBus::new());
    let reconciler = Arc::new(ScriptedReconciler::default());
    let worker = worker(
        reconciler.clone(),
        bus.clone(),
        Arc::new(CountingMetrics::new()),
        Duration::from_secs(3600),
    );

    worker.start().await;
    worker.stop().await;
    bus.notify(TOPIC).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(reconciler.passes(), 0);

    worker.start().await;
    bus.notify(TOPIC).await;
    let scripted = reconciler.clone();
    wait_for(move || scripted.passes() == 1).await;
    worker.stop().await;
    assert_eq!(bus.topic_count(), 0);
}
