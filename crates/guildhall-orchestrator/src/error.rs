// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for guildhall-orchestrator.

use thiserror::Error;

/// Orchestrator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential cipher failed.
    #[error("Cipher error: {0}")]
    Cipher(#[from] crate::cipher::CipherError),

    /// Tenant registry operation failed.
    #[error("Registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    /// Process supervision failed.
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    /// Control command was rejected or failed.
    #[error("Control error: {0}")]
    Control(#[from] crate::control::ControlError),

    /// Cache resilience layer failed.
    #[error("Resilience error: {0}")]
    Resilience(#[from] guildhall_resilience::ResilienceError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using orchestrator Error.
pub type Result<T> = std::result::Result<T, Error>;
