// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet Manager - control plane for a managed Kafka fleet
//!
//! A long-running process responsible for:
//! - Leader election among replicas sharing the database
//! - Placing accepted Kafka instances on clusters
//! - Driving instances and clusters through their lifecycles
//! - Relaying wake-up signals between replicas

use std::sync::Arc;
use tracing::{info, warn};

use fleet_manager::config::Config;
use fleet_manager::migrations;
use fleet_manager::persistence::PostgresPersistence;
use fleet_manager::provider::Providers;
use fleet_manager::runtime::FleetRuntime;
use fleet_manager::signal::{InMemorySignalBus, PgSignalBus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_manager=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        scaling_mode = ?config.dataplane.scaling_mode,
        configured_clusters = config.dataplane.clusters.len(),
        lease_type = %config.leader.lease_type,
        worker_poll_secs = config.worker_poll_interval.as_secs(),
        "Starting Fleet Manager"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run(&pool).await?;

    info!("Database schema verified");

    let bus = PgSignalBus::new(pool.clone(), Arc::new(InMemorySignalBus::new()))
        .with_reconnect_delay(config.signal_reconnect_delay);

    let runtime = FleetRuntime::builder()
        .persistence(Arc::new(PostgresPersistence::new(pool)))
        .signal_listener(bus.listener())
        .signal_bus(Arc::new(bus))
        .providers(Providers::default())
        .dataplane(config.dataplane)
        .leader_election(config.leader)
        .worker_poll_interval(config.worker_poll_interval)
        .build()?
        .start()
        .await?;

    info!(identity = %runtime.leader().identity(), "Fleet Manager ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Fleet Manager shut down");

    Ok(())
}
