// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for guildhall-resilience.

use thiserror::Error;

/// Resilience errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResilienceError {
    /// The shared cache returned an error.
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Metric registration or encoding failed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Encoded metrics were not valid UTF-8.
    #[error("Metrics encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Result type using ResilienceError.
pub type Result<T> = std::result::Result<T, ResilienceError>;
