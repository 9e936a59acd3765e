// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use super::{ClusterProvider, ProviderError, Result, StandaloneProvider};
use crate::model::ProviderKind;

/// Provider implementations keyed by [`ProviderKind`].
#[derive(Clone)]
pub struct Providers {
    managed: Option<Arc<dyn ClusterProvider>>,
    standalone: Arc<dyn ClusterProvider>,
}

impl Providers {
    /// Registry with only a standalone provider.
    pub fn new(standalone: Arc<dyn ClusterProvider>) -> Self {
        Self {
            managed: None,
            standalone,
        }
    }

    /// Register the managed provider.
    pub fn with_managed(mut self, managed: Arc<dyn ClusterProvider>) -> Self {
        self.managed = Some(managed);
        self
    }

    /// Provider for `kind`.
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ClusterProvider>> {
        match kind {
            ProviderKind::Managed => self
                .managed
                .clone()
                .ok_or(ProviderError::NotConfigured(ProviderKind::Managed)),
            ProviderKind::Standalone => Ok(self.standalone.clone()),
        }
    }
}

impl Default for Providers {
    fn default() -> Self {
        Self::new(Arc::new(StandaloneProvider))
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("managed", &self.managed.is_some())
            .finish_non_exhaustive()
    }
}
