// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provider for testing.
//!
//! Records every call and answers from scripted state instead of talking to a
//! provisioning backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::traits::*;
use crate::model::ProviderKind;

/// Mock cluster provider for testing.
pub struct MockProvider {
    calls: Mutex<HashMap<&'static str, usize>>,
    status: Mutex<ProviderClusterState>,
    error: Mutex<Option<ProviderError>>,
    addons_ready: AtomicBool,
    removal_confirmed: AtomicBool,
    /// Kind reported by [`ClusterProvider::kind`].
    pub kind: ProviderKind,
    /// DNS suffix returned when a spec carries no DNS.
    pub dns_suffix: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a mock provider where every operation succeeds immediately.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            status: Mutex::new(ProviderClusterState::Ready),
            error: Mutex::new(None),
            addons_ready: AtomicBool::new(true),
            removal_confirmed: AtomicBool::new(true),
            kind: ProviderKind::Managed,
            dns_suffix: "kafka.example.com".to_string(),
        }
    }

    /// Create a mock provider failing every operation with `error`.
    pub fn failing(error: ProviderError) -> Self {
        let provider = Self::new();
        provider.set_error(Some(error));
        provider
    }

    /// Script the state returned by `check_status`.
    pub fn set_status(&self, status: ProviderClusterState) {
        *lock(&self.status) = status;
    }

    /// Fail every operation with `error`, or stop failing with `None`.
    pub fn set_error(&self, error: Option<ProviderError>) {
        *lock(&self.error) = error;
    }

    /// Whether `install_addon` reports the addon installed.
    pub fn set_addons_ready(&self, ready: bool) {
        self.addons_ready.store(ready, Ordering::SeqCst);
    }

    /// Whether `delete` and `remove_resources` confirm the removal.
    pub fn set_removal_confirmed(&self, confirmed: bool) {
        self.removal_confirmed.store(confirmed, Ordering::SeqCst);
    }

    /// Number of calls made to `operation`.
    pub fn calls(&self, operation: &str) -> usize {
        lock(&self.calls).get(operation).copied().unwrap_or(0)
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;
        match lock(&self.error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ClusterProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create(&self, request: &ClusterRequest) -> Result<ClusterSpec> {
        self.record("create")?;
        Ok(ClusterSpec {
            cluster_id: request.cluster_id.clone(),
            internal_id: Some(format!("mock-{}", request.cluster_id)),
            external_id: Some(format!("ext-{}", request.cluster_id)),
            compute_nodes: request.compute_nodes,
            cluster_dns: None,
        })
    }

    async fn check_status(&self, _spec: &ClusterSpec) -> Result<ProviderClusterState> {
        self.record("check_status")?;
        Ok(lock(&self.status).clone())
    }

    async fn delete(&self, _spec: &ClusterSpec) -> Result<bool> {
        self.record("delete")?;
        Ok(self.removal_confirmed.load(Ordering::SeqCst))
    }

    async fn scale_up(&self, spec: &ClusterSpec, delta: i32) -> Result<ClusterSpec> {
        self.record("scale_up")?;
        let mut scaled = spec.clone();
        scaled.compute_nodes += delta;
        Ok(scaled)
    }

    async fn scale_down(&self, spec: &ClusterSpec, delta: i32) -> Result<ClusterSpec> {
        self.record("scale_down")?;
        let mut scaled = spec.clone();
        scaled.compute_nodes = (scaled.compute_nodes - delta).max(0);
        Ok(scaled)
    }

    async fn install_addon(&self, _spec: &ClusterSpec, _addon: &str) -> Result<bool> {
        self.record("install_addon")?;
        Ok(self.addons_ready.load(Ordering::SeqCst))
    }

    async fn add_identity_provider(
        &self,
        spec: &ClusterSpec,
        mut info: IdentityProviderInfo,
    ) -> Result<IdentityProviderInfo> {
        self.record("add_identity_provider")?;
        info.id = Some(format!("idp-{}", spec.cluster_id));
        Ok(info)
    }

    async fn cluster_dns(&self, spec: &ClusterSpec) -> Result<String> {
        self.record("cluster_dns")?;
        Ok(spec
            .cluster_dns
            .clone()
            .unwrap_or_else(|| format!("apps.{}.{}", spec.cluster_id, self.dns_suffix)))
    }

    async fn remove_resources(&self, _spec: &ClusterSpec, _resource: &str) -> Result<bool> {
        self.record("remove_resources")?;
        Ok(self.removal_confirmed.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ClusterRequest {
        ClusterRequest {
            cluster_id: "c1".to_string(),
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            multi_az: true,
            compute_nodes: 3,
        }
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let provider = MockProvider::new();
        let spec = provider.create(&request()).await.unwrap();
        provider.check_status(&spec).await.unwrap();
        provider.check_status(&spec).await.unwrap();

        assert_eq!(provider.calls("create"), 1);
        assert_eq!(provider.calls("check_status"), 2);
        assert_eq!(provider.calls("delete"), 0);
        assert_eq!(spec.internal_id.as_deref(), Some("mock-c1"));
    }

    #[tokio::test]
    async fn test_mock_scripted_state() {
        let provider = MockProvider::new();
        let spec = provider.create(&request()).await.unwrap();

        provider.set_status(ProviderClusterState::Installing);
        assert_eq!(
            provider.check_status(&spec).await.unwrap(),
            ProviderClusterState::Installing
        );

        provider.set_addons_ready(false);
        assert!(!provider.install_addon(&spec, STRIMZI_ADDON).await.unwrap());

        let scaled = provider.scale_up(&spec, 3).await.unwrap();
        assert_eq!(scaled.compute_nodes, 6);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let provider = MockProvider::failing(ProviderError::Transient("down".into()));
        let err = provider.create(&request()).await.unwrap_err();
        assert!(!err.is_terminal());
        assert_eq!(provider.calls("create"), 1);

        provider.set_error(None);
        assert!(provider.create(&request()).await.is_ok());
    }
}
