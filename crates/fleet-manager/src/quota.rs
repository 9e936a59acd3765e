// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entitlement checks before an instance is placed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::config::QuotaConfig;
use crate::error::Result;
use crate::model::KafkaRecord;
use crate::persistence::Persistence;

/// Reason recorded on an instance held back by quota.
pub const INSUFFICIENT_QUOTA: &str = "Insufficient quota";

/// Outcome of a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The instance may proceed under this subscription.
    Granted {
        /// Subscription backing the instance.
        subscription_id: String,
    },
    /// The instance must wait.
    Denied {
        /// Why.
        reason: String,
    },
}

/// Reserves and releases entitlement for instances.
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Reserve entitlement for `kafka`.
    async fn reserve(&self, kafka: &KafkaRecord) -> Result<QuotaDecision>;

    /// Give back a previously granted subscription.
    async fn release(&self, subscription_id: &str) -> Result<()>;
}

/// Grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaService for UnlimitedQuota {
    async fn reserve(&self, kafka: &KafkaRecord) -> Result<QuotaDecision> {
        Ok(QuotaDecision::Granted {
            subscription_id: format!("unlimited-{}", kafka.id),
        })
    }

    async fn release(&self, _subscription_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Per-organisation instance limits from configuration.
///
/// Usage is counted from the store, so releasing is a no-op: a deleted
/// instance stops counting once it is tombstoned.
pub struct OrganisationQuota {
    config: QuotaConfig,
    persistence: Arc<dyn Persistence>,
}

impl OrganisationQuota {
    /// Enforce `config` against instances in `persistence`.
    pub fn new(config: QuotaConfig, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            config,
            persistence,
        }
    }
}

#[async_trait]
impl QuotaService for OrganisationQuota {
    async fn reserve(&self, kafka: &KafkaRecord) -> Result<QuotaDecision> {
        let Some(limit) = self.config.limit_for(&kafka.organisation_id) else {
            return Ok(QuotaDecision::Denied {
                reason: INSUFFICIENT_QUOTA.to_string(),
            });
        };

        // Instances still waiting in accepted hold no quota, this one included.
        let used = self
            .persistence
            .count_kafkas_by_organisation(&kafka.organisation_id)
            .await?;

        debug!(
            kafka_id = %kafka.id,
            organisation_id = %kafka.organisation_id,
            used,
            limit,
            "Checking organisation quota"
        );

        if used >= limit {
            return Ok(QuotaDecision::Denied {
                reason: INSUFFICIENT_QUOTA.to_string(),
            });
        }

        Ok(QuotaDecision::Granted {
            subscription_id: Uuid::new_v4().to_string(),
        })
    }

    async fn release(&self, subscription_id: &str) -> Result<()> {
        debug!(subscription_id, "Released organisation quota");
        Ok(())
    }
}
