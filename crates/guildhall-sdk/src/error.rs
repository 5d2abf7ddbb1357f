// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SDK-specific error types.

use guildhall_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur in the SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Configuration error (missing or invalid environment variable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading from or writing to the supervisor failed
    #[error("supervisor link error: {0}")]
    Link(#[from] ProtocolError),
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
