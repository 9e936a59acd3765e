// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the fleet manager.

use thiserror::Error;

/// Fleet manager errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying schema migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A cluster provider call failed.
    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    /// Kafka instance was not found.
    #[error("Kafka instance not found: {0}")]
    KafkaNotFound(String),

    /// Cluster was not found.
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A stored record is missing data its current state requires.
    #[error("Invalid record {id}: {reason}")]
    InvalidRecord {
        /// Record identifier.
        id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error should be retried on the next pass.
    ///
    /// Terminal provider errors and broken records are not retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Provider(e) => !e.is_terminal(),
            Error::InvalidRecord { .. } | Error::InvalidRequest(_) => false,
            _ => true,
        }
    }
}

/// Result type using the fleet manager Error.
pub type Result<T> = std::result::Result<T, Error>;
