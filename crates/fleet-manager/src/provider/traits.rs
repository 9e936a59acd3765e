// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider trait definitions.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ClusterRecord, ProviderKind};

/// Addon carrying the Kafka operator.
pub const STRIMZI_ADDON: &str = "strimzi";

/// Addon carrying the data-plane agent.
pub const FLEETSHARD_ADDON: &str = "fleetshard";

/// Errors from provider operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// No implementation registered for this provider kind.
    #[error("No provider configured for {0}")]
    NotConfigured(ProviderKind),

    /// The provider cannot perform this operation.
    #[error("{provider} provider does not support {operation}")]
    Unsupported {
        /// Provider kind.
        provider: ProviderKind,
        /// Operation name.
        operation: &'static str,
    },

    /// Temporary failure, worth retrying.
    #[error("Provider unavailable: {0}")]
    Transient(String),

    /// The provider refused the request.
    #[error("Provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProviderError::Transient(_))
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// What to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRequest {
    /// Fleet cluster ID.
    pub cluster_id: String,
    /// Cloud provider.
    pub cloud_provider: String,
    /// Region.
    pub region: String,
    /// Spread over availability zones.
    pub multi_az: bool,
    /// Initial compute nodes.
    pub compute_nodes: i32,
}

impl ClusterRequest {
    /// Request for `cluster` with `compute_nodes` initial nodes.
    pub fn for_cluster(cluster: &ClusterRecord, compute_nodes: i32) -> Self {
        Self {
            cluster_id: cluster.id.clone(),
            cloud_provider: cluster.cloud_provider.clone(),
            region: cluster.region.clone(),
            multi_az: cluster.multi_az,
            compute_nodes,
        }
    }
}

/// Provider-side view of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    /// Fleet cluster ID.
    pub cluster_id: String,
    /// Provider-internal identifier.
    pub internal_id: Option<String>,
    /// Provider-external identifier.
    pub external_id: Option<String>,
    /// Current compute nodes.
    pub compute_nodes: i32,
    /// Known DNS name.
    pub cluster_dns: Option<String>,
}

impl From<&ClusterRecord> for ClusterSpec {
    fn from(cluster: &ClusterRecord) -> Self {
        Self {
            cluster_id: cluster.id.clone(),
            internal_id: cluster.internal_id.clone(),
            external_id: cluster.external_id.clone(),
            compute_nodes: cluster.compute_nodes,
            cluster_dns: cluster.cluster_dns.clone(),
        }
    }
}

/// Provisioning state reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderClusterState {
    /// Not started yet.
    Pending,
    /// In progress.
    Installing,
    /// Usable.
    Ready,
    /// Provisioning failed.
    Error(String),
}

/// Identity provider attached to a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProviderInfo {
    /// Set by the provider once created.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
}

impl IdentityProviderInfo {
    /// Identity provider for a fleet cluster.
    pub fn for_cluster(cluster_id: &str) -> Self {
        Self {
            id: None,
            name: format!("fleet-sso-{cluster_id}"),
        }
    }
}

/// Trait for cluster providers.
///
/// Providers are pure backends: they never touch the fleet store. The cluster
/// and Kafka workers persist whatever they return.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Provider kind this implementation serves.
    fn kind(&self) -> ProviderKind;

    /// Start creating a cluster.
    async fn create(&self, request: &ClusterRequest) -> Result<ClusterSpec>;

    /// Provisioning progress.
    async fn check_status(&self, spec: &ClusterSpec) -> Result<ProviderClusterState>;

    /// Tear down a cluster. Returns true once the teardown is confirmed.
    async fn delete(&self, spec: &ClusterSpec) -> Result<bool>;

    /// Add `delta` compute nodes.
    async fn scale_up(&self, spec: &ClusterSpec, delta: i32) -> Result<ClusterSpec>;

    /// Remove `delta` compute nodes.
    async fn scale_down(&self, spec: &ClusterSpec, delta: i32) -> Result<ClusterSpec>;

    /// Install an addon. Returns true once it is installed.
    async fn install_addon(&self, spec: &ClusterSpec, addon: &str) -> Result<bool>;

    /// Register an identity provider. The returned info carries its ID.
    async fn add_identity_provider(
        &self,
        spec: &ClusterSpec,
        info: IdentityProviderInfo,
    ) -> Result<IdentityProviderInfo>;

    /// Base DNS name for routes on the cluster.
    async fn cluster_dns(&self, spec: &ClusterSpec) -> Result<String>;

    /// Remove the named resource set. Returns true once removal is confirmed.
    async fn remove_resources(&self, spec: &ClusterSpec, resource: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retried() {
        assert!(!ProviderError::Transient("timeout".into()).is_terminal());
        assert!(ProviderError::Rejected("quota".into()).is_terminal());
        assert!(ProviderError::NotConfigured(ProviderKind::Managed).is_terminal());
        assert!(
            ProviderError::Unsupported {
                provider: ProviderKind::Standalone,
                operation: "scale_up",
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_error_messages() {
        let err = ProviderError::Unsupported {
            provider: ProviderKind::Standalone,
            operation: "scale_up",
        };
        assert_eq!(err.to_string(), "standalone provider does not support scale_up");
        assert_eq!(
            ProviderError::NotConfigured(ProviderKind::Managed).to_string(),
            "No provider configured for managed"
        );
    }
}
