// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cross-replica signals over PostgreSQL `LISTEN/NOTIFY`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::{PgConnection, PgPool};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::{InMemorySignalBus, SignalBus, Subscription};

/// Notification channel shared by every replica. The payload is the topic.
pub const CHANNEL: &str = "signalbus";

/// Signal bus that publishes through PostgreSQL.
///
/// Subscriptions live on a local [`InMemorySignalBus`]; a [`SignalListener`]
/// must run for notifications (including this replica's own) to reach them.
pub struct PgSignalBus {
    pool: PgPool,
    local: Arc<InMemorySignalBus>,
    reconnect_delay: Duration,
}

impl PgSignalBus {
    /// Create a bus publishing through `pool` and delivering into `local`.
    pub fn new(pool: PgPool, local: Arc<InMemorySignalBus>) -> Self {
        Self {
            pool,
            local,
            reconnect_delay: Duration::from_secs(10),
        }
    }

    /// Set the delay before the listener reconnects after a failure.
    ///
    /// Default: 10 seconds
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// The local bus inbound notifications are delivered to.
    pub fn local(&self) -> &Arc<InMemorySignalBus> {
        &self.local
    }

    /// Queue a notification on `conn`.
    ///
    /// Inside a transaction PostgreSQL holds the notification until commit
    /// and discards it on rollback.
    pub async fn notify_in(conn: &mut PgConnection, topic: &str) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANNEL)
            .bind(topic)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Build the listener that feeds inbound notifications to the local bus.
    pub fn listener(&self) -> SignalListener {
        SignalListener {
            pool: self.pool.clone(),
            local: self.local.clone(),
            reconnect_delay: self.reconnect_delay,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl SignalBus for PgSignalBus {
    fn subscribe(&self, topic: &str) -> Subscription {
        self.local.subscribe(topic)
    }

    async fn notify(&self, topic: &str) {
        let result = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANNEL)
            .bind(topic)
            .execute(&self.pool)
            .await;

        if let Err(e) = result {
            warn!(topic, error = %e, "Failed to publish signal, delivering locally only");
            self.local.notify(topic).await;
        }
    }
}

/// Background task that listens on [`CHANNEL`] and re-raises each
/// notification on the local bus.
pub struct SignalListener {
    pool: PgPool,
    local: Arc<InMemorySignalBus>,
    reconnect_delay: Duration,
    shutdown: Arc<Notify>,
}

impl SignalListener {
    /// Get a handle to trigger shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested, reconnecting after failures.
    pub async fn run(&self) {
        info!(
            channel = CHANNEL,
            reconnect_delay_secs = self.reconnect_delay.as_secs(),
            "Signal listener started"
        );

        'outer: loop {
            match self.connect().await {
                Ok(mut listener) => {
                    debug!(channel = CHANNEL, "Listening for signals");
                    loop {
                        tokio::select! {
                            biased;

                            _ = self.shutdown.notified() => break 'outer,
                            received = listener.recv() => match received {
                                Ok(notification) => {
                                    self.local.notify(notification.payload()).await;
                                }
                                Err(e) => {
                                    error!(error = %e, "Signal listener connection lost");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to start signal listener");
                }
            }

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!("Signal listener stopped");
    }

    async fn connect(&self) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANNEL).await?;
        Ok(listener)
    }
}
