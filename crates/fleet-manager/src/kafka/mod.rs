// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kafka instance lifecycle workers.
//!
//! One reconciler per phase. Each pass lists the instances in its phase and
//! advances them one at a time; every write is guarded on the status the
//! pass read, so a record changed by someone else is skipped rather than
//! overwritten.
//!
//! ```text
//! accepted ──► preparing ──► provisioning ──► ready
//!                  │              │  ▲          │
//!                  ▼              ▼  └─rejected │
//!               failed         failed           │
//!                                               ▼
//!          (any live state) ──────────────► deleting ──► deleted
//! ```

mod accepted;
mod deleting;
mod expiry;
mod preparing;
mod provisioning;
mod ready;

pub use accepted::AcceptedKafkaReconciler;
pub use deleting::DeletingKafkaReconciler;
pub use expiry::ExpiryReconciler;
pub use preparing::{PreparingKafkaReconciler, bootstrap_host};
pub use provisioning::{ProvisioningKafkaReconciler, mark_ready};
pub use ready::ReadyKafkaReconciler;

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::context::FleetContext;
use crate::error::{Error, Result};
use crate::model::KafkaRecord;
use crate::worker::Reconciler;

/// Wakes the accepted worker.
pub const KAFKA_ACCEPTED_TOPIC: &str = "reconcile:kafka_accepted";
/// Wakes the preparing worker.
pub const KAFKA_PREPARING_TOPIC: &str = "reconcile:kafka_preparing";
/// Wakes the provisioning worker.
pub const KAFKA_PROVISIONING_TOPIC: &str = "reconcile:kafka_provisioning";
/// Wakes the ready worker.
pub const KAFKA_READY_TOPIC: &str = "reconcile:kafka_ready";
/// Wakes the deleting worker.
pub const KAFKA_DELETING_TOPIC: &str = "reconcile:kafka_deleting";
/// Wakes the expiry worker.
pub const KAFKA_EXPIRY_TOPIC: &str = "reconcile:kafka_expiry";

/// Every Kafka reconciler, in lifecycle order.
pub fn reconcilers(ctx: &FleetContext) -> Vec<Arc<dyn Reconciler>> {
    vec![
        Arc::new(AcceptedKafkaReconciler::new(ctx.clone())),
        Arc::new(PreparingKafkaReconciler::new(ctx.clone())),
        Arc::new(ProvisioningKafkaReconciler::new(ctx.clone())),
        Arc::new(ReadyKafkaReconciler::new(ctx.clone())),
        Arc::new(DeletingKafkaReconciler::new(ctx.clone())),
        Arc::new(ExpiryReconciler::new(ctx.clone())),
    ]
}

/// Run `step` for every instance, collecting failures instead of stopping.
async fn reconcile_each<F, Fut>(
    worker_type: &'static str,
    kafkas: Vec<KafkaRecord>,
    mut step: F,
) -> Vec<Error>
where
    F: FnMut(KafkaRecord) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut errors = Vec::new();
    for kafka in kafkas {
        let kafka_id = kafka.id.clone();
        if let Err(e) = step(kafka).await {
            debug!(worker_type, kafka_id = %kafka_id, error = %e, "Instance not reconciled");
            errors.push(e);
        }
    }
    errors
}

fn elapsed_since(ctx: &FleetContext, since: chrono::DateTime<chrono::Utc>) -> std::time::Duration {
    (ctx.clock.now() - since).to_std().unwrap_or_default()
}
