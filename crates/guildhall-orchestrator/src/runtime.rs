// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for guildhall-orchestrator.
//!
//! [`OrchestratorRuntime`] wires the supervisor, control surface, registry
//! sync, fallback sweeper and HTTP control API together, so the
//! orchestrator can run inside an existing tokio application as well as
//! from the bundled binary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use guildhall_orchestrator::cipher::AesGcmCipher;
//! use guildhall_orchestrator::launcher::NativeLauncher;
//! use guildhall_orchestrator::registry::PostgresTenantRegistry;
//! use guildhall_orchestrator::runtime::OrchestratorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!
//!     let runtime = OrchestratorRuntime::builder()
//!         .registry(Arc::new(PostgresTenantRegistry::new(pool)))
//!         .launcher(Arc::new(NativeLauncher::new("./guildhall-example-bot")))
//!         .cipher(Arc::new(AesGcmCipher::from_base64_key("...")?))
//!         .bind_addr("0.0.0.0:8090".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use guildhall_resilience::sweeper::DEFAULT_SWEEP_INTERVAL;
use guildhall_resilience::{CooldownStore, FallbackSweeper, MetricsRegistry};
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cipher::CredentialCipher;
use crate::control::{CommandCooldown, ControlSurface};
use crate::launcher::Launcher;
use crate::metrics::SupervisorMetrics;
use crate::registry::TenantRegistry;
use crate::server::{self, AppState};
use crate::supervisor::{ProcessSupervisor, SupervisorConfig};
use crate::sync::RegistrySync;

/// Builder for creating an [`OrchestratorRuntime`].
pub struct OrchestratorRuntimeBuilder {
    registry: Option<Arc<dyn TenantRegistry>>,
    launcher: Option<Arc<dyn Launcher>>,
    cipher: Option<Arc<dyn CredentialCipher>>,
    supervisor_config: SupervisorConfig,
    bind_addr: SocketAddr,
    metrics: MetricsRegistry,
    cooldown: Option<Arc<CooldownStore>>,
    redis_url: Option<String>,
    autostart: bool,
    sweep_interval: Duration,
}

impl Default for OrchestratorRuntimeBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            launcher: None,
            cipher: None,
            supervisor_config: SupervisorConfig::default(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            metrics: MetricsRegistry::new(),
            cooldown: None,
            redis_url: None,
            autostart: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl OrchestratorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tenant registry (required).
    pub fn registry(mut self, registry: Arc<dyn TenantRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the process launcher (required).
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Set the credential cipher (required).
    pub fn cipher(mut self, cipher: Arc<dyn CredentialCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Set crash-recovery and stop timing.
    ///
    /// Default: [`SupervisorConfig::default`]
    pub fn supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.supervisor_config = config;
        self
    }

    /// Set the bind address for the control API. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8090`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the metrics registry served on `/metrics`.
    ///
    /// Pass the registry the cooldown store's metrics were registered on.
    pub fn metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    /// Rate-limit lifecycle commands through `store` and sweep its fallback.
    ///
    /// Default: no rate limiting
    pub fn cooldown(mut self, store: Arc<CooldownStore>) -> Self {
        self.cooldown = Some(store);
        self
    }

    /// Forward a shared cache address to every bot.
    pub fn redis_url(mut self, url: Option<String>) -> Self {
        self.redis_url = url;
        self
    }

    /// Start tenants persisted as running on boot.
    ///
    /// Default: true
    pub fn autostart(mut self, enabled: bool) -> Self {
        self.autostart = enabled;
        self
    }

    /// Set the fallback sweep interval.
    ///
    /// Default: 60 seconds
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<OrchestratorRuntimeConfig> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        let launcher = self
            .launcher
            .ok_or_else(|| anyhow::anyhow!("launcher is required"))?;
        let cipher = self
            .cipher
            .ok_or_else(|| anyhow::anyhow!("cipher is required"))?;

        Ok(OrchestratorRuntimeConfig {
            registry,
            launcher,
            cipher,
            supervisor_config: self.supervisor_config,
            bind_addr: self.bind_addr,
            metrics: self.metrics,
            cooldown: self.cooldown,
            redis_url: self.redis_url,
            autostart: self.autostart,
            sweep_interval: self.sweep_interval,
        })
    }
}

/// Configuration for an [`OrchestratorRuntime`].
pub struct OrchestratorRuntimeConfig {
    registry: Arc<dyn TenantRegistry>,
    launcher: Arc<dyn Launcher>,
    cipher: Arc<dyn CredentialCipher>,
    supervisor_config: SupervisorConfig,
    bind_addr: SocketAddr,
    metrics: MetricsRegistry,
    cooldown: Option<Arc<CooldownStore>>,
    redis_url: Option<String>,
    autostart: bool,
    sweep_interval: Duration,
}

impl OrchestratorRuntimeConfig {
    /// Start the runtime: background workers, HTTP server, then autostart.
    pub async fn start(self) -> Result<OrchestratorRuntime> {
        let supervisor_metrics = SupervisorMetrics::new(&self.metrics)?;

        let supervisor = ProcessSupervisor::builder(self.launcher.clone(), self.cipher)
            .config(self.supervisor_config)
            .metrics(supervisor_metrics.clone())
            .redis_url(self.redis_url)
            .build();

        // Subscribe before anything can spawn so no event is missed.
        let sync = RegistrySync::new(&supervisor, self.registry.clone());
        let sync_shutdown = sync.shutdown_handle();
        let sync_handle = tokio::spawn(sync.run());

        let mut control = ControlSurface::new(supervisor.clone(), self.registry.clone());
        let sweeper = match self.cooldown {
            Some(store) => {
                let sweeper = FallbackSweeper::new(store.fallback(), self.sweep_interval);
                control = control.with_cooldown(CommandCooldown::new(store));
                Some(sweeper)
            }
            None => None,
        };

        let (sweeper_shutdown, sweeper_handle) = match sweeper {
            Some(sweeper) => {
                let shutdown = sweeper.shutdown_handle();
                let handle = tokio::spawn(async move {
                    sweeper.run().await;
                });
                (Some(shutdown), Some(handle))
            }
            None => (None, None),
        };

        let listener = TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;
        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let state = AppState::new(control.clone(), self.metrics, Some(supervisor_metrics));
        let server_handle = tokio::spawn(server::serve(listener, state, server_shutdown_rx));

        if self.autostart {
            match control.autostart().await {
                Ok(started) => info!(started, "Autostart complete"),
                Err(e) => warn!(error = %e, "Autostart failed"),
            }
        }

        info!(
            bind_addr = %bind_addr,
            launcher = self.launcher.launcher_type(),
            "OrchestratorRuntime started"
        );

        Ok(OrchestratorRuntime {
            supervisor,
            control,
            server_handle,
            sync_handle,
            sweeper_handle,
            server_shutdown_tx,
            sync_shutdown,
            sweeper_shutdown,
            bind_addr,
        })
    }
}

/// A running orchestrator that can be embedded in an application.
///
/// The runtime manages:
/// - HTTP control API
/// - Process supervisor and its tenant processes
/// - Registry sync for autonomous crash-recovery transitions
/// - Fallback sweeper (when command cooldowns are enabled)
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct OrchestratorRuntime {
    supervisor: ProcessSupervisor,
    control: ControlSurface,
    server_handle: JoinHandle<std::io::Result<()>>,
    sync_handle: JoinHandle<()>,
    sweeper_handle: Option<JoinHandle<()>>,
    server_shutdown_tx: watch::Sender<bool>,
    sync_shutdown: Arc<Notify>,
    sweeper_shutdown: Option<Arc<Notify>>,
    bind_addr: SocketAddr,
}

impl OrchestratorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> OrchestratorRuntimeBuilder {
        OrchestratorRuntimeBuilder::new()
    }

    /// Address the control API is listening on.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// The process supervisor.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// The control surface.
    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting commands, stops every tenant process, then stops the
    /// background workers and waits for them.
    pub async fn shutdown(self) -> Result<()> {
        info!("OrchestratorRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);

        self.supervisor.shutdown().await;

        self.sync_shutdown.notify_one();
        if let Some(shutdown) = &self.sweeper_shutdown {
            shutdown.notify_one();
        }

        if let Err(e) = self.sync_handle.await {
            error!("Registry sync task panicked: {}", e);
        }

        if let Some(handle) = self.sweeper_handle
            && let Err(e) = handle.await
        {
            error!("Fallback sweeper task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("OrchestratorRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Control API error during shutdown: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("Control API task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        let sweeper_running = self
            .sweeper_handle
            .as_ref()
            .is_none_or(|h| !h.is_finished());

        !self.server_handle.is_finished() && !self.sync_handle.is_finished() && sweeper_running
    }
}
