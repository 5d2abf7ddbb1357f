// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launcher trait definitions.
//!
//! Defines the abstract interface for starting one isolated bot process.

use std::sync::Arc;

use async_trait::async_trait;
use guildhall_protocol::{ChildMessage, SupervisorMessage};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};

use crate::cipher::Secret;

/// Errors from launcher operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The OS refused to create the process.
    #[error("Failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),

    /// The process started but its pid could not be read.
    #[error("Spawned process has no pid")]
    MissingPid,

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LaunchError>;

/// Everything needed to start one tenant process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Tenant identifier
    pub tenant_id: String,
    /// Supervisor generation of this launch
    pub generation: u64,
    /// Non-secret environment for the child
    pub env: Vec<(String, String)>,
    /// Plaintext credential, placed only in the child's environment
    pub token: Secret,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Exit with a code.
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by signal.
    pub fn killed(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Only a zero exit code counts as clean.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something the child did.
#[derive(Debug, Clone)]
pub enum ChildEvent {
    /// An IPC message.
    Message(ChildMessage),
    /// The process ended. Always the last event.
    Exited(ExitInfo),
}

/// Forcible termination control.
///
/// Triggering before the launcher starts waiting is not lost.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    notify: Arc<Notify>,
}

impl KillSwitch {
    /// Create an untriggered switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination.
    pub fn kill(&self) {
        self.notify.notify_one();
    }

    /// Wait until termination is requested.
    pub async fn killed(&self) {
        self.notify.notified().await;
    }
}

/// A running child as seen by the supervisor.
#[derive(Debug)]
pub struct LaunchedChild {
    /// OS process id, if the backend has one
    pub pid: Option<u32>,
    /// Ordered channel to the child
    pub outbound: mpsc::Sender<SupervisorMessage>,
    /// Ordered events from the child, ending with [`ChildEvent::Exited`]
    pub events: mpsc::Receiver<ChildEvent>,
    /// Forcible termination
    pub kill: KillSwitch,
}

/// Trait for process launchers.
///
/// Launchers are pure execution backends: they do not touch the registry
/// and keep no per-tenant state the supervisor relies on.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launcher type identifier (e.g., "native", "mock")
    fn launcher_type(&self) -> &'static str;

    /// Start a child process and wire its IPC channels.
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedChild>;
}
