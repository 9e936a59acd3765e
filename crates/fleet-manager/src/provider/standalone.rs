// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider for clusters that already exist.
//!
//! Standalone clusters are registered through the placement configuration and
//! run the data plane on their own, so creation, addons, and teardown succeed
//! without doing anything. Node scaling is not available.

use async_trait::async_trait;

use super::traits::*;
use crate::model::ProviderKind;

/// Provider for pre-existing clusters.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandaloneProvider;

impl StandaloneProvider {
    fn unsupported(operation: &'static str) -> ProviderError {
        ProviderError::Unsupported {
            provider: ProviderKind::Standalone,
            operation,
        }
    }
}

#[async_trait]
impl ClusterProvider for StandaloneProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Standalone
    }

    async fn create(&self, request: &ClusterRequest) -> Result<ClusterSpec> {
        Ok(ClusterSpec {
            cluster_id: request.cluster_id.clone(),
            internal_id: Some(request.cluster_id.clone()),
            external_id: Some(request.cluster_id.clone()),
            compute_nodes: request.compute_nodes,
            cluster_dns: None,
        })
    }

    async fn check_status(&self, _spec: &ClusterSpec) -> Result<ProviderClusterState> {
        Ok(ProviderClusterState::Ready)
    }

    async fn delete(&self, _spec: &ClusterSpec) -> Result<bool> {
        Ok(true)
    }

    async fn scale_up(&self, _spec: &ClusterSpec, _delta: i32) -> Result<ClusterSpec> {
        Err(Self::unsupported("scale_up"))
    }

    async fn scale_down(&self, _spec: &ClusterSpec, _delta: i32) -> Result<ClusterSpec> {
        Err(Self::unsupported("scale_down"))
    }

    async fn install_addon(&self, _spec: &ClusterSpec, _addon: &str) -> Result<bool> {
        Ok(true)
    }

    async fn add_identity_provider(
        &self,
        spec: &ClusterSpec,
        mut info: IdentityProviderInfo,
    ) -> Result<IdentityProviderInfo> {
        if info.id.is_none() {
            info.id = Some(format!("standalone-{}", spec.cluster_id));
        }
        Ok(info)
    }

    async fn cluster_dns(&self, spec: &ClusterSpec) -> Result<String> {
        spec.cluster_dns.clone().ok_or_else(|| {
            ProviderError::Rejected(format!(
                "standalone cluster {} has no cluster_dns configured",
                spec.cluster_id
            ))
        })
    }

    async fn remove_resources(&self, _spec: &ClusterSpec, _resource: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dns: Option<&str>) -> ClusterSpec {
        ClusterSpec {
            cluster_id: "c1".to_string(),
            internal_id: None,
            external_id: None,
            compute_nodes: 3,
            cluster_dns: dns.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_cluster_dns_comes_from_configuration() {
        let provider = StandaloneProvider;
        assert_eq!(
            provider.cluster_dns(&spec(Some("apps.c1.example.com"))).await.ok(),
            Some("apps.c1.example.com".to_string())
        );

        let err = provider.cluster_dns(&spec(None)).await.err();
        assert!(err.is_some_and(|e| e.is_terminal()));
    }

    #[tokio::test]
    async fn test_scaling_is_unsupported() {
        let provider = StandaloneProvider;
        let err = provider.scale_up(&spec(None), 3).await.err();
        assert!(matches!(
            err,
            Some(ProviderError::Unsupported {
                operation: "scale_up",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_operations_succeed() {
        let provider = StandaloneProvider;
        let s = spec(None);
        assert_eq!(
            provider.check_status(&s).await.ok(),
            Some(ProviderClusterState::Ready)
        );
        assert_eq!(provider.install_addon(&s, STRIMZI_ADDON).await.ok(), Some(true));
        assert_eq!(provider.delete(&s).await.ok(), Some(true));

        let idp = provider
            .add_identity_provider(&s, IdentityProviderInfo::for_cluster("c1"))
            .await
            .unwrap();
        assert_eq!(idp.id.as_deref(), Some("standalone-c1"));
    }
}
