// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the fleet manager.
//!
//! Process settings come from `FLEET_*` environment variables. The ordered
//! cluster list used by manual scaling and the organisation quotas are read
//! from the JSON file named by `FLEET_CLUSTER_CONFIG_FILE`:
//!
//! ```json
//! {
//!   "clusters": [
//!     {
//!       "cluster_id": "c-east-1",
//!       "provider_type": "standalone",
//!       "cloud_provider": "aws",
//!       "region": "us-east-1",
//!       "multi_az": true,
//!       "schedulable": true,
//!       "kafka_instance_limit": 3,
//!       "status": "ready",
//!       "cluster_dns": "apps.east.example.com"
//!     }
//!   ],
//!   "quota": { "default_limit": 5, "organisations": { "org-1": 20 } }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::model::{ClusterStatus, ProviderKind};

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,
    /// Connection pool size
    pub max_connections: u32,
    /// Leader election settings
    pub leader: LeaderElectionConfig,
    /// Poll interval shared by all reconciliation workers
    pub worker_poll_interval: Duration,
    /// Delay before the signal listener reconnects after an error
    pub signal_reconnect_delay: Duration,
    /// Data-plane placement and lifecycle settings
    pub dataplane: DataPlaneConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLEET_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("FLEET_DATABASE_URL or DATABASE_URL"))?;

        let max_connections: u32 = parse_var("FLEET_DB_MAX_CONNECTIONS", 10)?;

        let leader = LeaderElectionConfig {
            lease_type: std::env::var("FLEET_LEASE_TYPE")
                .unwrap_or_else(|_| LeaderElectionConfig::DEFAULT_LEASE_TYPE.to_string()),
            poll_interval: Duration::from_secs(parse_var("FLEET_LEADER_POLL_SECS", 10)?),
            lease_ttl: Duration::from_secs(parse_var("FLEET_LEASE_TTL_SECS", 30)?),
        };
        leader.validate()?;

        let worker_poll_interval = Duration::from_secs(parse_var("FLEET_WORKER_POLL_SECS", 30)?);
        let signal_reconnect_delay =
            Duration::from_secs(parse_var("FLEET_SIGNAL_RECONNECT_SECS", 10)?);

        let scaling_mode: ScalingMode = parse_var("FLEET_SCALING_MODE", ScalingMode::Manual)?;

        let mut dataplane = match std::env::var("FLEET_CLUSTER_CONFIG_FILE") {
            Ok(path) => DataPlaneConfig::from_file(path)?,
            Err(_) => DataPlaneConfig::default(),
        };
        dataplane.scaling_mode = scaling_mode;
        dataplane.kafka_domain = std::env::var("FLEET_KAFKA_DOMAIN")
            .ok()
            .filter(|d| !d.is_empty());
        dataplane.max_preparing_duration =
            Duration::from_secs(parse_var("FLEET_MAX_PREPARING_SECS", 300)?);
        dataplane.eval_lifespan =
            Duration::from_secs(parse_var::<u64>("FLEET_EVAL_LIFESPAN_HOURS", 48)? * 3600);
        dataplane.autoscale = AutoscaleConfig {
            instances_per_node: parse_var("FLEET_INSTANCES_PER_NODE", 2)?,
            min_compute_nodes: parse_var("FLEET_MIN_COMPUTE_NODES", 3)?,
            max_compute_nodes: parse_var("FLEET_MAX_COMPUTE_NODES", 18)?,
            scale_step: parse_var("FLEET_SCALE_STEP_NODES", 3)?,
        };
        dataplane.validate()?;

        Ok(Self {
            database_url,
            max_connections,
            leader,
            worker_poll_interval,
            signal_reconnect_delay,
            dataplane,
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("cannot parse '{}'", raw),
        }),
        Err(_) => Ok(default),
    }
}

/// Leader election settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    /// Lease row name.
    pub lease_type: String,
    /// How often the lease is acquired or renewed.
    pub poll_interval: Duration,
    /// How long an acquired lease stays valid.
    pub lease_ttl: Duration,
}

impl LeaderElectionConfig {
    /// Lease shared by all reconciliation workers.
    pub const DEFAULT_LEASE_TYPE: &'static str = "worker_leader";

    /// TTL must outlive at least one missed renewal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "FLEET_LEADER_POLL_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.lease_ttl <= self.poll_interval {
            return Err(ConfigError::Invalid {
                key: "FLEET_LEASE_TTL_SECS",
                reason: format!(
                    "lease TTL ({}s) must exceed the poll interval ({}s)",
                    self.lease_ttl.as_secs_f64(),
                    self.poll_interval.as_secs_f64()
                ),
            });
        }
        Ok(())
    }
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            lease_type: Self::DEFAULT_LEASE_TYPE.to_string(),
            poll_interval: Duration::from_secs(10), // Renew every 10 seconds
            lease_ttl: Duration::from_secs(30),     // Tolerates two missed renewals
        }
    }
}

/// How cluster capacity is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Operators list clusters and limits in the configuration file.
    Manual,
    /// Clusters are scaled by the cluster worker.
    Auto,
}

impl FromStr for ScalingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(ScalingMode::Manual),
            "auto" => Ok(ScalingMode::Auto),
            other => Err(format!("unknown scaling mode '{}'", other)),
        }
    }
}

/// A cluster entry from the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManualCluster {
    /// Cluster identifier, matches `ClusterRecord::id`.
    pub cluster_id: String,
    /// Provider managing the cluster.
    #[serde(default = "default_provider_type")]
    pub provider_type: ProviderKind,
    /// Cloud provider.
    pub cloud_provider: String,
    /// Region.
    pub region: String,
    /// Multi-AZ.
    #[serde(default)]
    pub multi_az: bool,
    /// Whether placement may use the cluster.
    #[serde(default = "default_true")]
    pub schedulable: bool,
    /// Maximum number of instances placed on the cluster.
    pub kafka_instance_limit: i64,
    /// Status the cluster is registered with.
    #[serde(default = "default_cluster_status")]
    pub status: ClusterStatus,
    /// Known base DNS.
    #[serde(default)]
    pub cluster_dns: Option<String>,
}

fn default_provider_type() -> ProviderKind {
    ProviderKind::Standalone
}

fn default_true() -> bool {
    true
}

fn default_cluster_status() -> ClusterStatus {
    ClusterStatus::Accepted
}

/// Per-organisation instance quotas.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuotaConfig {
    /// Limit for organisations not listed explicitly. `None` denies them.
    #[serde(default)]
    pub default_limit: Option<i64>,
    /// Explicit limits.
    #[serde(default)]
    pub organisations: HashMap<String, i64>,
}

impl QuotaConfig {
    /// Instance limit for an organisation, if it has any entitlement.
    pub fn limit_for(&self, organisation_id: &str) -> Option<i64> {
        self.organisations
            .get(organisation_id)
            .copied()
            .or(self.default_limit)
    }
}

/// Capacity model used in auto scaling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoscaleConfig {
    /// Instances one compute node can host.
    pub instances_per_node: i32,
    /// Clusters are never scaled below this.
    pub min_compute_nodes: i32,
    /// Clusters are never scaled above this.
    pub max_compute_nodes: i32,
    /// Nodes added or removed per scaling step.
    pub scale_step: i32,
}

impl AutoscaleConfig {
    /// Instance capacity of a cluster with `compute_nodes` nodes.
    pub fn capacity(&self, compute_nodes: i32) -> i64 {
        i64::from(compute_nodes.max(self.min_compute_nodes)) * i64::from(self.instances_per_node)
    }
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            instances_per_node: 2,
            min_compute_nodes: 3,
            max_compute_nodes: 18,
            scale_step: 3, // One node per availability zone
        }
    }
}

/// Placement and lifecycle settings for the data plane.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPlaneConfig {
    /// Selects the placement policy and whether clusters are autoscaled.
    pub scaling_mode: ScalingMode,
    /// Ordered cluster list for manual scaling.
    pub clusters: Vec<ManualCluster>,
    /// Organisation quotas; `None` means unlimited.
    pub quota: Option<QuotaConfig>,
    /// Domain for bootstrap hosts; falls back to the cluster DNS.
    pub kafka_domain: Option<String>,
    /// How long transient errors are retried while preparing.
    pub max_preparing_duration: Duration,
    /// Lifespan of eval instances.
    pub eval_lifespan: Duration,
    /// Auto scaling capacity model.
    pub autoscale: AutoscaleConfig,
}

#[derive(Debug, Deserialize)]
struct DataPlaneFile {
    #[serde(default)]
    clusters: Vec<ManualCluster>,
    #[serde(default)]
    quota: Option<QuotaConfig>,
}

impl DataPlaneConfig {
    /// Read the cluster list and quotas from a JSON file, other fields default.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw).map_err(|e| match e {
            ConfigError::File { reason, .. } => ConfigError::File {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse the JSON document described in the module docs.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: DataPlaneFile = serde_json::from_str(raw).map_err(|e| ConfigError::File {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        let config = Self {
            clusters: file.clusters,
            quota: file.quota,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Configured entry for a cluster.
    pub fn cluster(&self, cluster_id: &str) -> Option<&ManualCluster> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    /// Reject duplicate ids and non-positive limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for cluster in &self.clusters {
            if !seen.insert(cluster.cluster_id.as_str()) {
                return Err(ConfigError::Invalid {
                    key: "clusters",
                    reason: format!("duplicate cluster_id '{}'", cluster.cluster_id),
                });
            }
            if cluster.kafka_instance_limit < 1 {
                return Err(ConfigError::Invalid {
                    key: "kafka_instance_limit",
                    reason: format!(
                        "cluster '{}' must allow at least one instance",
                        cluster.cluster_id
                    ),
                });
            }
        }
        let scaling = &self.autoscale;
        if scaling.min_compute_nodes > scaling.max_compute_nodes {
            return Err(ConfigError::Invalid {
                key: "FLEET_MIN_COMPUTE_NODES",
                reason: "must not exceed FLEET_MAX_COMPUTE_NODES".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            scaling_mode: ScalingMode::Manual,
            clusters: Vec::new(),
            quota: None,
            kafka_domain: None,
            max_preparing_duration: Duration::from_secs(300), // 5 minutes of transient errors
            eval_lifespan: Duration::from_secs(48 * 3600),    // 48 hours
            autoscale: AutoscaleConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A setting has an invalid value.
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Setting name.
        key: &'static str,
        /// What is wrong.
        reason: String,
    },
    /// The cluster configuration file could not be read or parsed.
    #[error("Cannot load cluster configuration {}: {reason}", path.display())]
    File {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },
}
