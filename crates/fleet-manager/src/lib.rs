// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet Manager - Managed Kafka Control Plane
//!
//! This crate provides the control plane of a managed Kafka service. It
//! places requested Kafka instances on data-plane clusters and drives both
//! instances and clusters through their lifecycles with background workers.
//! Several replicas may run against the same database; leader election makes
//! sure only one of them reconciles at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      API layer / data-plane agents                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ FleetService
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      fleet-manager (This Crate)                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │   Leader    │  │   Kafka     │  │   Cluster   │  │  Placement  │     │
//! │  │  Election   │──│  Workers    │  │   Worker    │  │  & Quota    │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! │         │                │  ▲             │                             │
//! │         │                │  │ signals     │ ClusterProvider             │
//! │         │                ▼  │             ▼                             │
//! │         │         ┌─────────────┐  ┌───────────────────────┐            │
//! │         │         │ Signal Bus  │  │ managed / standalone  │            │
//! │         │         └─────────────┘  └───────────────────────┘            │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                │ LISTEN/NOTIFY
//!           ▼                ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                           PostgreSQL                                   │
//! │        (Leases, Clusters, Kafka instances, Status reports)             │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Workers
//!
//! | Worker | Topic | Moves |
//! |--------|-------|-------|
//! | `kafka_accepted` | `reconcile:kafka_accepted` | accepted → preparing |
//! | `kafka_preparing` | `reconcile:kafka_preparing` | preparing → provisioning / failed |
//! | `kafka_provisioning` | `reconcile:kafka_provisioning` | provisioning → ready / failed / deleting |
//! | `kafka_ready` | `reconcile:kafka_ready` | ready → deleting |
//! | `kafka_deleting` | `reconcile:kafka_deleting` | deleting → deleted |
//! | `kafka_expiry` | `reconcile:kafka_expiry` | expired eval → deleting |
//! | `cluster` | `reconcile:cluster` | the whole cluster lifecycle |
//!
//! Each worker reconciles when its topic is signaled or its poll interval
//! elapses, whichever comes first. Passes of one worker never overlap.
//!
//! # Cluster Status State Machine
//!
//! ```text
//!   accepted ──► provisioning ──► provisioned ──► waiting_for_operator
//!                     │                                  │
//!                     ▼                                  ▼
//!                  failed                     ready ◄──► full
//!                                               │
//!                                               ▼
//!                             deprovisioning ──► cleanup ──► deleted
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FLEET_DATABASE_URL` | Yes* | - | PostgreSQL connection string |
//! | `DATABASE_URL` | Yes* | - | Fallback if above not set |
//! | `FLEET_DB_MAX_CONNECTIONS` | No | `10` | Connection pool size |
//! | `FLEET_LEASE_TYPE` | No | `worker_leader` | Lease row shared by the workers |
//! | `FLEET_LEADER_POLL_SECS` | No | `10` | Lease renewal interval |
//! | `FLEET_LEASE_TTL_SECS` | No | `30` | Lease validity, must exceed the poll interval |
//! | `FLEET_WORKER_POLL_SECS` | No | `30` | Worker reconcile interval |
//! | `FLEET_SIGNAL_RECONNECT_SECS` | No | `10` | Signal listener reconnect delay |
//! | `FLEET_SCALING_MODE` | No | `manual` | `manual` or `auto` |
//! | `FLEET_CLUSTER_CONFIG_FILE` | No | - | JSON cluster list and quotas |
//! | `FLEET_KAFKA_DOMAIN` | No | - | Bootstrap host domain override |
//! | `FLEET_MAX_PREPARING_SECS` | No | `300` | Preparing timeout for transient errors |
//! | `FLEET_EVAL_LIFESPAN_HOURS` | No | `48` | Lifetime of eval instances |
//! | `FLEET_INSTANCES_PER_NODE` | No | `2` | Autoscale capacity per compute node |
//! | `FLEET_MIN_COMPUTE_NODES` | No | `3` | Autoscale lower bound |
//! | `FLEET_MAX_COMPUTE_NODES` | No | `18` | Autoscale upper bound |
//! | `FLEET_SCALE_STEP_NODES` | No | `3` | Nodes added or removed per step |
//!
//! # Modules
//!
//! - [`config`]: Process and data-plane configuration
//! - [`persistence`]: Fleet store (PostgreSQL and in-memory)
//! - [`signal`]: Topic-based wake-up signals
//! - [`leader`]: Database lease leader election
//! - [`worker`]: Signal- and timer-driven reconcile loop
//! - [`placement`]: Cluster selection for new instances
//! - [`kafka`]: Kafka instance lifecycle workers
//! - [`cluster`]: Cluster lifecycle worker
//! - [`runtime`]: Composition root

#![deny(missing_docs)]

/// Database migrations for the fleet manager.
pub mod migrations;

/// Process and data-plane configuration.
pub mod config;

/// Error types for fleet operations.
pub mod error;

/// Time source.
pub mod clock;

/// Cluster, instance and lease records.
pub mod model;

/// Fleet store.
pub mod persistence;

/// Topic-based wake-up signals.
pub mod signal;

/// Metric events.
pub mod metrics;

/// Cluster backends.
pub mod provider;

/// Organisation entitlements.
pub mod quota;

/// Capabilities shared by workers and services.
pub mod context;

/// Cluster selection for new instances.
pub mod placement;

/// Reconcile loop shared by all workers.
pub mod worker;

/// Database lease leader election.
pub mod leader;

/// Kafka instance lifecycle workers.
pub mod kafka;

/// Cluster lifecycle worker.
pub mod cluster;

/// API entry points.
pub mod services;

/// Embeddable runtime for the fleet manager.
pub mod runtime;

pub use config::Config;
pub use error::{Error, Result};
pub use runtime::{FleetRuntime, FleetRuntimeBuilder, FleetRuntimeConfig};
