// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker mirroring autonomous supervisor transitions into the
//! tenant registry.
//!
//! Commands issued through the control surface persist their own outcome.
//! Crash recovery happens without a caller, so this worker persists it:
//!
//! | Event | Registry update |
//! |-------|-----------------|
//! | `Ready` | `mark_ready` |
//! | unintentional `Stopped`, non-zero exit | `record_crash` |
//! | unintentional `Stopped`, exit code 0 | `mark_stopped` |
//! | `RestartsExhausted` | `mark_failed` |
//! | `RespawnFailed` | `mark_failed` |
//!
//! Events are applied after the fact, so a command may have moved the tenant
//! on in the meantime. Events that no longer match the supervisor's status
//! (a `Ready` for a tenant that has since been stopped, say) are skipped.

use std::sync::Arc;

use tokio::sync::{Notify, broadcast};
use tracing::{debug, error, info, warn};

use crate::registry::{Result, TenantRegistry};
use crate::supervisor::{ProcessStatus, ProcessSupervisor, SupervisorEvent};

/// Background worker applying supervisor events to the registry.
pub struct RegistrySync {
    supervisor: ProcessSupervisor,
    registry: Arc<dyn TenantRegistry>,
    events: broadcast::Receiver<SupervisorEvent>,
    shutdown: Arc<Notify>,
}

impl RegistrySync {
    /// Subscribe to `supervisor`. Events emitted after this call are not lost.
    pub fn new(supervisor: &ProcessSupervisor, registry: Arc<dyn TenantRegistry>) -> Self {
        Self {
            supervisor: supervisor.clone(),
            registry,
            events: supervisor.subscribe(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is signalled or the supervisor is dropped.
    pub async fn run(mut self) {
        info!("Registry sync started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Registry sync received shutdown signal");
                    break;
                }

                event = self.events.recv() => match event {
                    Ok(event) => self.handle(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Registry sync lagged behind supervisor events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("Registry sync stopped");
    }

    async fn handle(&self, event: &SupervisorEvent) {
        let tenant_id = event.tenant_id();
        let status = self.supervisor.get_status(tenant_id).await;
        if !still_current(event, status) {
            debug!(tenant_id = %tenant_id, status = %status, "Skipping superseded supervisor event");
            return;
        }
        if let Err(e) = apply(self.registry.as_ref(), event).await {
            error!(tenant_id = %tenant_id, error = %e, "Failed to persist supervisor event");
        }
    }
}

/// Whether `event` still agrees with the supervisor's current `status`.
pub fn still_current(event: &SupervisorEvent, status: ProcessStatus) -> bool {
    match event {
        SupervisorEvent::Ready { .. } => status == ProcessStatus::Running,
        SupervisorEvent::Stopped {
            exit_code: Some(0),
            intentional: false,
            ..
        } => !status.occupies_slot(),
        SupervisorEvent::RestartsExhausted { .. } | SupervisorEvent::RespawnFailed { .. } => {
            status == ProcessStatus::Error
        }
        _ => true,
    }
}

/// Persist one supervisor event.
pub async fn apply(registry: &dyn TenantRegistry, event: &SupervisorEvent) -> Result<()> {
    match event {
        SupervisorEvent::Ready { tenant_id, .. } => registry.mark_ready(tenant_id).await,
        SupervisorEvent::Stopped {
            tenant_id,
            exit_code,
            signal,
            intentional: false,
        } => {
            if *exit_code == Some(0) {
                registry.mark_stopped(tenant_id).await
            } else {
                registry
                    .record_crash(tenant_id, &describe_exit(*exit_code, *signal))
                    .await
            }
        }
        SupervisorEvent::RestartsExhausted { tenant_id, restarts } => {
            let message = format!("Crashed {} times, automatic restarts exhausted", restarts + 1);
            registry.mark_failed(tenant_id, &message).await
        }
        SupervisorEvent::RespawnFailed { tenant_id, error } => {
            registry.mark_failed(tenant_id, error).await
        }
        other => {
            debug!(tenant_id = %other.tenant_id(), "No registry update for event");
            Ok(())
        }
    }
}

fn describe_exit(code: Option<i32>, signal: Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("Bot exited with code {code}"),
        (None, Some(signal)) => format!("Bot terminated by signal {signal}"),
        (None, None) => "Bot exited".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_exit() {
        assert_eq!(describe_exit(Some(1), None), "Bot exited with code 1");
        assert_eq!(describe_exit(None, Some(9)), "Bot terminated by signal 9");
        assert_eq!(describe_exit(None, None), "Bot exited");
    }

    #[test]
    fn test_still_current() {
        let ready = SupervisorEvent::Ready {
            tenant_id: "t1".to_string(),
            guilds: 1,
        };
        assert!(still_current(&ready, ProcessStatus::Running));
        assert!(!still_current(&ready, ProcessStatus::Stopped));
        assert!(!still_current(&ready, ProcessStatus::Starting));

        let exhausted = SupervisorEvent::RestartsExhausted {
            tenant_id: "t1".to_string(),
            restarts: 5,
        };
        assert!(still_current(&exhausted, ProcessStatus::Error));
        assert!(!still_current(&exhausted, ProcessStatus::Running));

        let clean_exit = SupervisorEvent::Stopped {
            tenant_id: "t1".to_string(),
            exit_code: Some(0),
            signal: None,
            intentional: false,
        };
        assert!(still_current(&clean_exit, ProcessStatus::Stopped));
        assert!(!still_current(&clean_exit, ProcessStatus::Starting));

        let crash = SupervisorEvent::Stopped {
            tenant_id: "t1".to_string(),
            exit_code: Some(1),
            signal: None,
            intentional: false,
        };
        assert!(still_current(&crash, ProcessStatus::Starting));
    }
}
