// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant process supervisor.
//!
//! [`ProcessSupervisor`] owns the authoritative table of tenant processes:
//! at most one [`TenantProcessRecord`] per tenant. Nothing else may signal
//! a tenant's process.
//!
//! # Record lifecycle
//!
//! ```text
//!            spawn()                 ready
//!   (none) ──────────► STARTING ──────────────► RUNNING
//!                         │                        │
//!                         │ exit                   │ stop()
//!                         ▼                        ▼
//!    ┌──────────────── STOPPED ◄────── exit ─── STOPPING ──► record removed
//!    │ restart_delay      │
//!    │ (count < max)      │ count >= max
//!    ▼                    ▼
//!  spawn()              ERROR  (terminal until an explicit spawn / stop)
//! ```
//!
//! # Concurrency
//!
//! The table sits behind a `tokio::sync::Mutex`. `spawn` inserts its
//! `STARTING` reservation while holding the lock and before the first
//! `.await` on the credential cipher, so a concurrent `spawn` for the same
//! tenant observes the reservation and fails with
//! [`SupervisorError::AlreadyRunning`]. The lock is never held across
//! decryption, launching, or waiting for an exit.
//!
//! A crash respawn takes its reservation the same way, and only if the
//! crashed record is still waiting for it. A `stop` that runs at any point
//! after the crash therefore cancels the respawn.
//!
//! Every launch gets a fresh generation number. Events from a child whose
//! generation no longer matches the record are ignored, so a late exit from
//! a replaced process cannot disturb its successor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use guildhall_protocol::{ChildMessage, SupervisorMessage, env};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::cipher::{CipherError, CredentialCipher};
use crate::launcher::{
    ChildEvent, ExitInfo, KillSwitch, LaunchError, LaunchSpec, LaunchedChild, Launcher,
};
use crate::metrics::SupervisorMetrics;

const EVENT_CAPACITY: usize = 256;

/// Crash-recovery and stop timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Automatic respawns allowed within one crash loop
    pub max_restarts: u32,
    /// Fixed delay between a crash and the respawn
    pub restart_delay: Duration,
    /// Time a child gets to exit after `shutdown` before it is killed
    pub stop_grace: Duration,
    /// Time to wait for the exit after a kill
    pub kill_wait: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_delay: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            kill_wait: Duration::from_secs(5),
        }
    }
}

/// Supervisor-side process status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Reserved or launched, waiting for `ready`.
    Starting,
    /// The bot reported `ready`.
    Running,
    /// Graceful stop in progress.
    Stopping,
    /// No live process (default for untracked tenants).
    Stopped,
    /// Crash recovery gave up.
    Error,
}

impl ProcessStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ProcessStatus; 5] = [
        ProcessStatus::Starting,
        ProcessStatus::Running,
        ProcessStatus::Stopping,
        ProcessStatus::Stopped,
        ProcessStatus::Error,
    ];

    /// Status string.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Error => "error",
        }
    }

    /// Whether a process occupies (or is about to occupy) the tenant's slot.
    pub fn occupies_slot(self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable spawn configuration for one tenant.
#[derive(Clone)]
pub struct TenantConfig {
    /// Tenant identifier
    pub tenant_id: String,
    /// Encrypted bot token envelope
    pub encrypted_token: String,
    /// Public client id
    pub client_id: String,
    /// Tenant database connection string
    pub database_url: String,
    /// Cache key namespace
    pub cache_prefix: String,
}

impl fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("cache_prefix", &self.cache_prefix)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a tracked tenant.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    /// Current status
    pub status: ProcessStatus,
    /// OS pid of the live process
    pub pid: Option<u32>,
    /// Most recent spawn
    pub started_at: Option<DateTime<Utc>>,
    /// Respawns within the current crash loop
    pub restart_count: u32,
    /// A crash respawn is scheduled
    pub respawn_pending: bool,
}

/// Lifecycle notifications, published on a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// A child was launched and attached.
    Starting {
        /// Tenant identifier
        tenant_id: String,
        /// Launch generation
        generation: u64,
        /// OS pid
        pid: Option<u32>,
    },
    /// The child reported `ready`.
    Ready {
        /// Tenant identifier
        tenant_id: String,
        /// Connected guilds
        guilds: u64,
    },
    /// The child reported an error without exiting.
    ChildError {
        /// Tenant identifier
        tenant_id: String,
        /// Reported message
        message: String,
    },
    /// The child exited.
    Stopped {
        /// Tenant identifier
        tenant_id: String,
        /// Exit code
        exit_code: Option<i32>,
        /// Terminating signal
        signal: Option<i32>,
        /// The exit was requested through `stop`
        intentional: bool,
    },
    /// A crash respawn was scheduled.
    RestartScheduled {
        /// Tenant identifier
        tenant_id: String,
        /// Restart count after this attempt
        attempt: u32,
        /// Delay before the respawn
        delay: Duration,
    },
    /// Crash recovery gave up; the record is now `error`.
    RestartsExhausted {
        /// Tenant identifier
        tenant_id: String,
        /// Respawns performed
        restarts: u32,
    },
    /// A scheduled respawn could not start the process.
    RespawnFailed {
        /// Tenant identifier
        tenant_id: String,
        /// Failure description
        error: String,
    },
}

impl SupervisorEvent {
    /// Tenant the event is about.
    pub fn tenant_id(&self) -> &str {
        match self {
            SupervisorEvent::Starting { tenant_id, .. }
            | SupervisorEvent::Ready { tenant_id, .. }
            | SupervisorEvent::ChildError { tenant_id, .. }
            | SupervisorEvent::Stopped { tenant_id, .. }
            | SupervisorEvent::RestartScheduled { tenant_id, .. }
            | SupervisorEvent::RestartsExhausted { tenant_id, .. }
            | SupervisorEvent::RespawnFailed { tenant_id, .. } => tenant_id,
        }
    }
}

/// Supervisor errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// A process already occupies the tenant's slot.
    #[error("Tenant {0} is already running")]
    AlreadyRunning(String),

    /// The credential could not be decrypted. The reservation was released.
    #[error("Credential error for tenant {tenant_id}: {source}")]
    Credential {
        /// Tenant identifier
        tenant_id: String,
        /// Cipher failure
        #[source]
        source: CipherError,
    },

    /// The OS failed to create the process. The reservation was released.
    #[error("Failed to launch process for tenant {tenant_id}: {source}")]
    Fork {
        /// Tenant identifier
        tenant_id: String,
        /// Launcher failure
        #[source]
        source: LaunchError,
    },

    /// The reservation was removed (by `stop`) while the process launched;
    /// the new process was killed.
    #[error("Spawn for tenant {0} was cancelled")]
    Cancelled(String),

    /// The tenant is not tracked.
    #[error("Tenant {0} is not tracked")]
    NotFound(String),

    /// The process did not exit even after being killed.
    #[error("Tenant {0} did not exit after being killed")]
    StopTimeout(String),
}

#[derive(Clone)]
struct ChildHandle {
    pid: Option<u32>,
    outbound: mpsc::Sender<SupervisorMessage>,
    kill: KillSwitch,
    exited: watch::Receiver<bool>,
}

/// One tenant's slot in the process table.
struct TenantProcessRecord {
    config: TenantConfig,
    status: ProcessStatus,
    generation: u64,
    child: Option<ChildHandle>,
    started_at: Option<DateTime<Utc>>,
    restart_count: u32,
    respawn_pending: bool,
}

impl TenantProcessRecord {
    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            status: self.status,
            pid: self.child.as_ref().and_then(|c| c.pid),
            started_at: self.started_at,
            restart_count: self.restart_count,
            respawn_pending: self.respawn_pending,
        }
    }
}

struct Inner {
    records: Mutex<HashMap<String, TenantProcessRecord>>,
    launcher: Arc<dyn Launcher>,
    cipher: Arc<dyn CredentialCipher>,
    config: SupervisorConfig,
    events: broadcast::Sender<SupervisorEvent>,
    next_generation: AtomicU64,
    metrics: Option<SupervisorMetrics>,
    redis_url: Option<String>,
}

/// Builder for a [`ProcessSupervisor`].
pub struct ProcessSupervisorBuilder {
    launcher: Arc<dyn Launcher>,
    cipher: Arc<dyn CredentialCipher>,
    config: SupervisorConfig,
    metrics: Option<SupervisorMetrics>,
    redis_url: Option<String>,
}

impl ProcessSupervisorBuilder {
    /// Set crash-recovery and stop timing.
    ///
    /// Default: [`SupervisorConfig::default`]
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Export restart counts through `metrics`.
    pub fn metrics(mut self, metrics: SupervisorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Forward a shared cache address to every child.
    pub fn redis_url(mut self, url: Option<String>) -> Self {
        self.redis_url = url;
        self
    }

    /// Build the supervisor.
    pub fn build(self) -> ProcessSupervisor {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        ProcessSupervisor {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                launcher: self.launcher,
                cipher: self.cipher,
                config: self.config,
                events,
                next_generation: AtomicU64::new(0),
                metrics: self.metrics,
                redis_url: self.redis_url,
            }),
        }
    }
}

/// Who asked for a launch.
#[derive(Debug, Clone, Copy)]
enum Admission {
    /// `spawn` from a caller.
    Explicit,
    /// Crash recovery for the given crashed generation.
    Respawn(u64),
}

/// Spawns, stops and crash-recovers one isolated process per tenant.
///
/// Cheap to clone; clones share the same process table.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Start building a supervisor around a launcher and a credential cipher.
    pub fn builder(
        launcher: Arc<dyn Launcher>,
        cipher: Arc<dyn CredentialCipher>,
    ) -> ProcessSupervisorBuilder {
        ProcessSupervisorBuilder {
            launcher,
            cipher,
            config: SupervisorConfig::default(),
            metrics: None,
            redis_url: None,
        }
    }

    /// Crash-recovery and stop timing in use.
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Launch the tenant's process.
    ///
    /// Fails with [`SupervisorError::AlreadyRunning`] if a process occupies
    /// the slot. The restart count of a failed record, or of a crash loop
    /// waiting on its respawn, is carried over; any other prior record
    /// starts from zero.
    pub async fn spawn(&self, config: TenantConfig) -> Result<(), SupervisorError> {
        self.launch(config, Admission::Explicit).await
    }

    async fn launch(
        &self,
        config: TenantConfig,
        admission: Admission,
    ) -> Result<(), SupervisorError> {
        let tenant_id = config.tenant_id.clone();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut records = self.inner.records.lock().await;
            let restart_count = match (admission, records.get(&tenant_id)) {
                (Admission::Explicit, Some(record)) if record.status.occupies_slot() => {
                    return Err(SupervisorError::AlreadyRunning(tenant_id));
                }
                (Admission::Explicit, Some(record))
                    if record.status == ProcessStatus::Error || record.respawn_pending =>
                {
                    record.restart_count
                }
                (Admission::Explicit, _) => 0,
                // A stop or another start since the crash wins over the respawn.
                (Admission::Respawn(crashed), Some(record))
                    if record.generation == crashed
                        && record.status == ProcessStatus::Stopped
                        && record.respawn_pending =>
                {
                    record.restart_count
                }
                (Admission::Respawn(_), _) => {
                    return Err(SupervisorError::Cancelled(tenant_id));
                }
            };
            records.insert(
                tenant_id.clone(),
                TenantProcessRecord {
                    config: config.clone(),
                    status: ProcessStatus::Starting,
                    generation,
                    child: None,
                    started_at: Some(Utc::now()),
                    restart_count,
                    respawn_pending: false,
                },
            );
        }

        let token = match self.inner.cipher.decrypt(&config.encrypted_token).await {
            Ok(token) => token,
            Err(source) => {
                warn!(tenant_id = %tenant_id, error = %source, "Credential decryption failed");
                let err = SupervisorError::Credential {
                    tenant_id: tenant_id.clone(),
                    source,
                };
                self.abandon(&tenant_id, generation, admission, &err).await;
                return Err(err);
            }
        };

        let spec = LaunchSpec {
            tenant_id: tenant_id.clone(),
            generation,
            env: self.child_env(&config),
            token,
        };

        let LaunchedChild {
            pid,
            outbound,
            events,
            kill,
        } = match self.inner.launcher.launch(spec).await {
            Ok(child) => child,
            Err(source) => {
                error!(tenant_id = %tenant_id, error = %source, "Failed to launch bot process");
                let err = SupervisorError::Fork {
                    tenant_id: tenant_id.clone(),
                    source,
                };
                self.abandon(&tenant_id, generation, admission, &err).await;
                return Err(err);
            }
        };

        let (exit_tx, exit_rx) = watch::channel(false);
        {
            let mut records = self.inner.records.lock().await;
            match records.get_mut(&tenant_id) {
                Some(record) if record.generation == generation => {
                    record.child = Some(ChildHandle {
                        pid,
                        outbound,
                        kill: kill.clone(),
                        exited: exit_rx,
                    });
                }
                _ => {
                    warn!(tenant_id = %tenant_id, ?pid, "Reservation removed during launch, killing process");
                    kill.kill();
                    return Err(SupervisorError::Cancelled(tenant_id));
                }
            }
        }

        info!(tenant_id = %tenant_id, generation, ?pid, "Bot process starting");
        self.emit(SupervisorEvent::Starting {
            tenant_id: tenant_id.clone(),
            generation,
            pid,
        });

        tokio::spawn(self.clone().pump(tenant_id, generation, events, exit_tx));
        Ok(())
    }

    /// Stop the tenant's process gracefully, killing it after the grace
    /// window. No-op when nothing is running.
    ///
    /// A pending crash respawn is cancelled. On confirmed exit the record is
    /// removed, which also resets the crash-loop counter.
    pub async fn stop(&self, tenant_id: &str) -> Result<(), SupervisorError> {
        let (generation, child) = {
            let mut records = self.inner.records.lock().await;
            let Some(record) = records.get_mut(tenant_id) else {
                return Ok(());
            };

            match record.status {
                ProcessStatus::Stopped => {
                    if record.respawn_pending {
                        records.remove(tenant_id);
                        info!(tenant_id = %tenant_id, "Cancelled pending respawn");
                    }
                    return Ok(());
                }
                ProcessStatus::Error => {
                    records.remove(tenant_id);
                    info!(tenant_id = %tenant_id, "Cleared failed record");
                    return Ok(());
                }
                ProcessStatus::Stopping => {
                    // Another stop owns the exit; wait for it alongside.
                    let exited = record.child.as_ref().map(|c| c.exited.clone());
                    drop(records);
                    if let Some(exited) = exited {
                        let limit = self.inner.config.stop_grace + self.inner.config.kill_wait;
                        wait_exited(exited, limit).await;
                    }
                    return Ok(());
                }
                ProcessStatus::Starting | ProcessStatus::Running => {}
            }

            // Suppress any crash recovery racing with this stop.
            record.restart_count = self.inner.config.max_restarts;
            record.respawn_pending = false;

            let Some(child) = record.child.clone() else {
                // Reserved but not launched yet; the pending spawn kills what
                // it launches once it sees the reservation gone.
                records.remove(tenant_id);
                info!(tenant_id = %tenant_id, "Released pending reservation");
                return Ok(());
            };
            record.status = ProcessStatus::Stopping;
            (record.generation, child)
        };

        info!(tenant_id = %tenant_id, generation, pid = ?child.pid, "Stopping bot process");
        if let Err(e) = child.outbound.try_send(SupervisorMessage::Shutdown) {
            debug!(tenant_id = %tenant_id, error = %e, "Could not deliver shutdown");
        }

        let mut exited = wait_exited(child.exited.clone(), self.inner.config.stop_grace).await;
        if !exited {
            warn!(
                tenant_id = %tenant_id,
                pid = ?child.pid,
                grace_secs = self.inner.config.stop_grace.as_secs(),
                "Bot did not exit within grace period, killing"
            );
            child.kill.kill();
            exited = wait_exited(child.exited.clone(), self.inner.config.kill_wait).await;
        }

        let mut records = self.inner.records.lock().await;
        let current = records
            .get(tenant_id)
            .is_some_and(|r| r.generation == generation);

        if !exited {
            error!(tenant_id = %tenant_id, pid = ?child.pid, "Bot process did not exit after kill");
            if current && let Some(record) = records.get_mut(tenant_id) {
                record.status = ProcessStatus::Error;
            }
            return Err(SupervisorError::StopTimeout(tenant_id.to_string()));
        }

        if current {
            records.remove(tenant_id);
        }
        info!(tenant_id = %tenant_id, "Bot process stopped");
        Ok(())
    }

    /// Stop then spawn with the tracked configuration.
    pub async fn restart(&self, tenant_id: &str) -> Result<(), SupervisorError> {
        let config = {
            let records = self.inner.records.lock().await;
            records.get(tenant_id).map(|r| r.config.clone())
        }
        .ok_or_else(|| SupervisorError::NotFound(tenant_id.to_string()))?;

        self.stop(tenant_id).await?;
        self.spawn(config).await
    }

    /// Current status; `Stopped` for untracked tenants.
    pub async fn get_status(&self, tenant_id: &str) -> ProcessStatus {
        self.inner
            .records
            .lock()
            .await
            .get(tenant_id)
            .map(|r| r.status)
            .unwrap_or(ProcessStatus::Stopped)
    }

    /// Snapshot of a tracked tenant.
    pub async fn process_info(&self, tenant_id: &str) -> Option<ProcessInfo> {
        self.inner
            .records
            .lock()
            .await
            .get(tenant_id)
            .map(TenantProcessRecord::info)
    }

    /// Ids of every tracked tenant, sorted.
    pub async fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.records.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of tracked tenants per status.
    pub async fn status_counts(&self) -> Vec<(ProcessStatus, usize)> {
        let records = self.inner.records.lock().await;
        ProcessStatus::ALL
            .iter()
            .map(|status| {
                let n = records.values().filter(|r| r.status == *status).count();
                (*status, n)
            })
            .collect()
    }

    /// Best-effort send to a running child. Returns false when the tenant
    /// has no running process or the channel is full.
    pub async fn send_message(&self, tenant_id: &str, message: SupervisorMessage) -> bool {
        let records = self.inner.records.lock().await;
        match records.get(tenant_id) {
            Some(record) if record.status == ProcessStatus::Running => record
                .child
                .as_ref()
                .is_some_and(|c| c.outbound.try_send(message).is_ok()),
            _ => false,
        }
    }

    /// Stop every tracked tenant concurrently.
    pub async fn shutdown(&self) {
        let tenants = self.tracked().await;
        info!(count = tenants.len(), "Stopping all bot processes");

        let results = join_all(tenants.iter().map(|t| self.stop(t))).await;
        for (tenant_id, result) in tenants.iter().zip(results) {
            if let Err(e) = result {
                error!(tenant_id = %tenant_id, error = %e, "Failed to stop bot process");
            }
        }
    }

    fn child_env(&self, config: &TenantConfig) -> Vec<(String, String)> {
        let mut vars = vec![
            (env::TENANT_ID.to_string(), config.tenant_id.clone()),
            (env::CLIENT_ID.to_string(), config.client_id.clone()),
            (env::DATABASE_URL.to_string(), config.database_url.clone()),
            (env::CACHE_PREFIX.to_string(), config.cache_prefix.clone()),
            (
                env::HEALTH_SERVER.to_string(),
                env::HEALTH_SERVER_DISABLED.to_string(),
            ),
        ];
        if let Some(url) = &self.inner.redis_url {
            vars.push((env::REDIS_URL.to_string(), url.clone()));
        }
        vars
    }

    /// Undo a reservation whose launch failed. An explicit spawn leaves no
    /// record behind; a failed respawn leaves an `Error` record.
    async fn abandon(
        &self,
        tenant_id: &str,
        generation: u64,
        admission: Admission,
        err: &SupervisorError,
    ) {
        let mut records = self.inner.records.lock().await;
        if !records
            .get(tenant_id)
            .is_some_and(|r| r.generation == generation)
        {
            return;
        }
        match admission {
            Admission::Explicit => {
                records.remove(tenant_id);
            }
            Admission::Respawn(_) => {
                if let Some(record) = records.get_mut(tenant_id) {
                    record.status = ProcessStatus::Error;
                    record.started_at = None;
                }
                self.emit(SupervisorEvent::RespawnFailed {
                    tenant_id: tenant_id.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn pump(
        self,
        tenant_id: String,
        generation: u64,
        mut events: mpsc::Receiver<ChildEvent>,
        exit_tx: watch::Sender<bool>,
    ) {
        let mut exit = ExitInfo::default();
        while let Some(event) = events.recv().await {
            match event {
                ChildEvent::Message(msg) => self.handle_message(&tenant_id, generation, msg).await,
                ChildEvent::Exited(info) => {
                    exit = info;
                    break;
                }
            }
        }
        self.handle_exit(&tenant_id, generation, exit).await;
        let _ = exit_tx.send(true);
    }

    async fn handle_message(&self, tenant_id: &str, generation: u64, msg: ChildMessage) {
        let mut records = self.inner.records.lock().await;
        let Some(record) = records
            .get_mut(tenant_id)
            .filter(|r| r.generation == generation)
        else {
            debug!(tenant_id = %tenant_id, generation, kind = msg.kind(), "Ignoring message from stale process");
            return;
        };

        match msg {
            ChildMessage::Ready { guilds } => {
                if record.status == ProcessStatus::Starting {
                    record.status = ProcessStatus::Running;
                    info!(tenant_id = %tenant_id, guilds, "Bot ready");
                    self.emit(SupervisorEvent::Ready {
                        tenant_id: tenant_id.to_string(),
                        guilds,
                    });
                } else {
                    debug!(tenant_id = %tenant_id, status = %record.status, "Ignoring ready");
                }
            }
            ChildMessage::Error { message } => {
                warn!(tenant_id = %tenant_id, error = %message, "Bot reported error");
                self.emit(SupervisorEvent::ChildError {
                    tenant_id: tenant_id.to_string(),
                    message,
                });
            }
        }
    }

    async fn handle_exit(&self, tenant_id: &str, generation: u64, exit: ExitInfo) {
        let mut records = self.inner.records.lock().await;
        let Some(record) = records
            .get_mut(tenant_id)
            .filter(|r| r.generation == generation)
        else {
            debug!(tenant_id = %tenant_id, generation, "Ignoring exit of stale process");
            return;
        };

        let intentional = record.status == ProcessStatus::Stopping;
        record.status = ProcessStatus::Stopped;
        record.child = None;
        self.emit(SupervisorEvent::Stopped {
            tenant_id: tenant_id.to_string(),
            exit_code: exit.code,
            signal: exit.signal,
            intentional,
        });

        if intentional {
            return;
        }
        if exit.is_clean() {
            info!(tenant_id = %tenant_id, "Bot exited cleanly");
            return;
        }

        let max = self.inner.config.max_restarts;
        if record.restart_count < max {
            record.restart_count += 1;
            record.respawn_pending = true;
            let attempt = record.restart_count;
            let delay = self.inner.config.restart_delay;
            warn!(
                tenant_id = %tenant_id,
                exit_code = ?exit.code,
                signal = ?exit.signal,
                attempt,
                max_restarts = max,
                delay_ms = delay.as_millis() as u64,
                "Bot crashed, scheduling respawn"
            );
            if let Some(metrics) = &self.inner.metrics {
                metrics.inc_restarts();
            }
            self.emit(SupervisorEvent::RestartScheduled {
                tenant_id: tenant_id.to_string(),
                attempt,
                delay,
            });
            self.schedule_respawn(tenant_id.to_string(), generation, delay);
        } else {
            record.status = ProcessStatus::Error;
            error!(
                tenant_id = %tenant_id,
                exit_code = ?exit.code,
                signal = ?exit.signal,
                restarts = record.restart_count,
                "Bot crashed, restart limit reached"
            );
            self.emit(SupervisorEvent::RestartsExhausted {
                tenant_id: tenant_id.to_string(),
                restarts: record.restart_count,
            });
        }
    }

    fn schedule_respawn(&self, tenant_id: String, generation: u64, delay: Duration) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let (config, attempt) = {
                let records = supervisor.inner.records.lock().await;
                match records.get(&tenant_id) {
                    Some(record) if record.generation == generation && record.respawn_pending => {
                        (record.config.clone(), record.restart_count)
                    }
                    _ => {
                        debug!(tenant_id = %tenant_id, "Respawn no longer wanted");
                        return;
                    }
                }
            };

            // `launch` re-checks the crashed record under the lock, so a stop
            // landing here still cancels the respawn.
            info!(tenant_id = %tenant_id, attempt, "Respawning bot process");
            match supervisor.launch(config, Admission::Respawn(generation)).await {
                Ok(()) => {}
                Err(SupervisorError::Cancelled(_)) => {
                    debug!(tenant_id = %tenant_id, "Respawn cancelled");
                }
                Err(e) => {
                    error!(tenant_id = %tenant_id, error = %e, "Respawn failed");
                }
            }
        });
    }
}

async fn wait_exited(mut exited: watch::Receiver<bool>, limit: Duration) -> bool {
    // A closed channel means the pump finished, which only happens after exit.
    tokio::time::timeout(limit, exited.wait_for(|done| *done))
        .await
        .is_ok()
}
