// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic reconciliation loop.
//!
//! A [`Worker`] wakes on its poll interval or when its signal topic is
//! notified, whichever comes first, and runs one [`Reconciler`] pass. Passes
//! of one worker never overlap. Each pass runs in its own task so a panic is
//! logged and the loop keeps going.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::metrics::MetricsRecorder;
use crate::signal::{SignalBus, Subscription};

/// One phase of reconciliation.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Worker type, used in logs and metrics.
    fn worker_type(&self) -> &'static str;

    /// Signal topic that wakes this reconciler early.
    fn topic(&self) -> &'static str;

    /// Process every record in this phase.
    ///
    /// Returns the errors of records that could not be processed; one failing
    /// record never stops the others.
    async fn reconcile(&self) -> Vec<Error>;
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Start/stoppable loop around a [`Reconciler`].
pub struct Worker {
    reconciler: Arc<dyn Reconciler>,
    bus: Arc<dyn SignalBus>,
    metrics: Arc<dyn MetricsRecorder>,
    poll_interval: Duration,
    running: Mutex<Option<Running>>,
}

impl Worker {
    /// Create a stopped worker.
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        bus: Arc<dyn SignalBus>,
        metrics: Arc<dyn MetricsRecorder>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            bus,
            metrics,
            poll_interval,
            running: Mutex::new(None),
        }
    }

    /// Worker type of the wrapped reconciler.
    pub fn worker_type(&self) -> &'static str {
        self.reconciler.worker_type()
    }

    /// Start the loop. No-op if already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!(worker_type = self.worker_type(), "Worker already running");
            return;
        }

        // Subscribe before spawning so a signal sent right after start is seen.
        let subscription = self.bus.subscribe(self.reconciler.topic());
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_loop(
            self.reconciler.clone(),
            self.metrics.clone(),
            subscription,
            self.poll_interval,
            shutdown.clone(),
        ));

        *running = Some(Running { handle, shutdown });
    }

    /// Stop the loop, waiting for an in-flight pass to finish. No-op if stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { handle, shutdown }) = running.take() else {
            return;
        };

        shutdown.notify_one();
        if let Err(e) = handle.await {
            error!(worker_type = self.worker_type(), error = %e, "Worker task panicked");
        }
    }

    /// Whether the loop is running.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

async fn run_loop(
    reconciler: Arc<dyn Reconciler>,
    metrics: Arc<dyn MetricsRecorder>,
    subscription: Subscription,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
) {
    let worker_type = reconciler.worker_type();
    info!(
        worker_type,
        topic = reconciler.topic(),
        poll_interval_secs = poll_interval.as_secs(),
        "Worker started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => break,
            _ = subscription.signaled() => {
                debug!(worker_type, "Worker woken by signal");
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        run_pass(&reconciler, metrics.as_ref()).await;
    }

    subscription.close();
    info!(worker_type, "Worker stopped");
}

async fn run_pass(reconciler: &Arc<dyn Reconciler>, metrics: &dyn MetricsRecorder) {
    let worker_type = reconciler.worker_type();
    let started = Instant::now();

    let task = reconciler.clone();
    let errors = match tokio::spawn(async move { task.reconcile().await }).await {
        Ok(errors) => errors,
        Err(e) => {
            error!(worker_type, error = %e, "Reconcile pass panicked");
            metrics.reconcile_pass(worker_type, started.elapsed(), 1);
            return;
        }
    };

    for e in &errors {
        error!(worker_type, error = %e, "Reconcile error");
    }
    metrics.reconcile_pass(worker_type, started.elapsed(), errors.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CountingMetrics;
    use crate::signal::InMemorySignalBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReconciler {
        passes: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for CountingReconciler {
        fn worker_type(&self) -> &'static str {
            "counting"
        }

        fn topic(&self) -> &'static str {
            "reconcile:counting"
        }

        async fn reconcile(&self) -> Vec<Error> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            vec![Error::Other("record failed".to_string())]
        }
    }

    #[tokio::test]
    async fn test_start_stop_are_idempotent() {
        let bus = Arc::new(InMemorySignalBus::new());
        let worker = Worker::new(
            Arc::new(CountingReconciler {
                passes: AtomicUsize::new(0),
            }),
            bus.clone(),
            Arc::new(CountingMetrics::new()),
            Duration::from_secs(3600),
        );

        worker.stop().await;
        assert!(!worker.is_running().await);

        worker.start().await;
        worker.start().await;
        assert!(worker.is_running().await);
        assert_eq!(bus.subscriber_count("reconcile:counting"), 1);

        worker.stop().await;
        worker.stop().await;
        assert!(!worker.is_running().await);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_the_loop() {
        let bus = Arc::new(InMemorySignalBus::new());
        let reconciler = Arc::new(CountingReconciler {
            passes: AtomicUsize::new(0),
        });
        let metrics = Arc::new(CountingMetrics::new());
        let worker = Worker::new(
            reconciler.clone(),
            bus,
            metrics.clone(),
            Duration::from_millis(5),
        );

        worker.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await;

        assert!(reconciler.passes.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            metrics.passes("counting"),
            reconciler.passes.load(Ordering::SeqCst)
        );
    }
}
