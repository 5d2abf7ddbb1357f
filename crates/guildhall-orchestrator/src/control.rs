// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control surface for tenant bots.
//!
//! [`ControlSurface`] is the only caller that both drives the
//! [`ProcessSupervisor`] and writes lifecycle state to the
//! [`TenantRegistry`]. The registry is always written after the supervisor
//! confirms a transition, so a tenant is never persisted as running while
//! no process exists.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use guildhall_resilience::CooldownStore;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::{RegistryError, TenantBot, TenantRegistry, TenantStatus};
use crate::supervisor::{ProcessInfo, ProcessStatus, ProcessSupervisor, SupervisorError};

/// Errors from control commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControlError {
    /// The tenant is not in the registry.
    #[error("Tenant {0} not found")]
    NotFound(String),

    /// The tenant is administratively suspended.
    #[error("Tenant {0} is suspended")]
    Suspended(String),

    /// A process already occupies the tenant's slot.
    #[error("Bot for tenant {0} is already running")]
    AlreadyRunning(String),

    /// Nothing to stop.
    #[error("Bot for tenant {0} is already stopped")]
    AlreadyStopped(String),

    /// Too many lifecycle commands for this tenant.
    #[error("Too many commands for tenant {tenant_id}, retry in {retry_after}s")]
    RateLimited {
        /// Tenant identifier
        tenant_id: String,
        /// Seconds until the window resets
        retry_after: u64,
    },

    /// The supervisor refused or failed the transition.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Persisting the transition failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ControlError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Suspended(_) | Self::AlreadyRunning(_) | Self::AlreadyStopped(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Supervisor(_) | Self::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let Self::RateLimited { retry_after, .. } = self
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Per-tenant rate limit on lifecycle commands.
#[derive(Clone)]
pub struct CommandCooldown {
    store: Arc<CooldownStore>,
    limit: u64,
    window: Duration,
}

impl CommandCooldown {
    /// Default commands allowed per window.
    pub const DEFAULT_LIMIT: u64 = 10;

    /// Default window.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

    /// Allow [`Self::DEFAULT_LIMIT`] commands per [`Self::DEFAULT_WINDOW`].
    pub fn new(store: Arc<CooldownStore>) -> Self {
        Self {
            store,
            limit: Self::DEFAULT_LIMIT,
            window: Self::DEFAULT_WINDOW,
        }
    }

    /// Override the limit and window.
    pub fn with_limit(mut self, limit: u64, window: Duration) -> Self {
        self.limit = limit;
        self.window = window;
        self
    }

    async fn check(&self, tenant_id: &str) -> Result<(), ControlError> {
        let key = format!("control:{tenant_id}");
        let (count, served) = self.store.increment(&key, self.window).await;
        if count <= self.limit {
            return Ok(());
        }
        let (retry_after, _) = self.store.get_ttl(&key).await;
        warn!(
            tenant_id = %tenant_id,
            count,
            limit = self.limit,
            served = served.as_str(),
            "Control command rate limited"
        );
        Err(ControlError::RateLimited {
            tenant_id: tenant_id.to_string(),
            retry_after,
        })
    }
}

/// Coarse health derived from the supervisor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Running without crashes in the current loop.
    Healthy,
    /// Running after at least one crash respawn.
    Degraded,
    /// Waiting for the bot to report ready.
    Starting,
    /// Crash recovery gave up.
    Failed,
    /// No process.
    Offline,
}

impl Health {
    fn of(info: Option<&ProcessInfo>) -> Self {
        match info {
            Some(info) => match info.status {
                ProcessStatus::Running if info.restart_count == 0 => Health::Healthy,
                ProcessStatus::Running => Health::Degraded,
                ProcessStatus::Starting => Health::Starting,
                ProcessStatus::Error => Health::Failed,
                ProcessStatus::Stopping | ProcessStatus::Stopped => Health::Offline,
            },
            None => Health::Offline,
        }
    }
}

/// A registry row joined with the supervisor's live view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatusView {
    /// Tenant identifier
    pub tenant_id: String,
    /// Live supervisor status
    pub status: ProcessStatus,
    /// Derived health
    pub health: Health,
    /// OS pid of the live process
    pub process_id: Option<u32>,
    /// Respawns in the current crash loop
    pub restart_count: u32,
    /// Most recent spawn
    pub started_at: Option<DateTime<Utc>>,
    /// Persisted lifecycle status
    pub registry_status: TenantStatus,
    /// Administrative suspension
    pub is_suspended: bool,
    /// Most recent persisted failure
    pub last_error: Option<String>,
    /// Persisted failure count
    pub error_count: i32,
}

impl TenantStatusView {
    fn new(bot: TenantBot, info: Option<ProcessInfo>) -> Self {
        Self {
            health: Health::of(info.as_ref()),
            status: info
                .as_ref()
                .map(|i| i.status)
                .unwrap_or(ProcessStatus::Stopped),
            process_id: info.as_ref().and_then(|i| i.pid),
            restart_count: info.as_ref().map(|i| i.restart_count).unwrap_or(0),
            started_at: info.as_ref().and_then(|i| i.started_at),
            tenant_id: bot.tenant_id,
            registry_status: bot.status,
            is_suspended: bot.is_suspended,
            last_error: bot.last_error,
            error_count: bot.error_count,
        }
    }
}

/// Start/stop/restart façade keeping the supervisor and registry aligned.
#[derive(Clone)]
pub struct ControlSurface {
    supervisor: ProcessSupervisor,
    registry: Arc<dyn TenantRegistry>,
    cooldown: Option<CommandCooldown>,
}

impl ControlSurface {
    /// Create a control surface without command rate limiting.
    pub fn new(supervisor: ProcessSupervisor, registry: Arc<dyn TenantRegistry>) -> Self {
        Self {
            supervisor,
            registry,
            cooldown: None,
        }
    }

    /// Rate-limit lifecycle commands per tenant.
    pub fn with_cooldown(mut self, cooldown: CommandCooldown) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Underlying supervisor.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Start the tenant's bot.
    pub async fn start(&self, tenant_id: &str) -> Result<(), ControlError> {
        self.check_cooldown(tenant_id).await?;
        self.start_unthrottled(tenant_id).await
    }

    /// Stop the tenant's bot.
    pub async fn stop(&self, tenant_id: &str) -> Result<(), ControlError> {
        self.check_cooldown(tenant_id).await?;
        self.fetch(tenant_id).await?;

        let stoppable = self
            .supervisor
            .process_info(tenant_id)
            .await
            .is_some_and(|info| info.status != ProcessStatus::Stopped || info.respawn_pending);
        if !stoppable {
            return Err(ControlError::AlreadyStopped(tenant_id.to_string()));
        }

        self.supervisor.stop(tenant_id).await?;
        self.registry.mark_stopped(tenant_id).await?;
        info!(tenant_id = %tenant_id, "Bot stopped by command");
        Ok(())
    }

    /// Stop then start the tenant's bot, without the "already running" guard.
    pub async fn restart(&self, tenant_id: &str) -> Result<(), ControlError> {
        self.check_cooldown(tenant_id).await?;
        let bot = self.fetch(tenant_id).await?;
        if bot.is_suspended {
            return Err(ControlError::Suspended(tenant_id.to_string()));
        }

        self.supervisor.stop(tenant_id).await?;
        let result = self.supervisor.spawn(bot.config()).await;
        self.persist_spawn(tenant_id, result).await?;
        info!(tenant_id = %tenant_id, "Bot restarted by command");
        Ok(())
    }

    /// Status of one registered tenant.
    pub async fn status(&self, tenant_id: &str) -> Result<TenantStatusView, ControlError> {
        let bot = self.fetch(tenant_id).await?;
        let info = self.supervisor.process_info(tenant_id).await;
        Ok(TenantStatusView::new(bot, info))
    }

    /// Status of every registered tenant.
    pub async fn list_statuses(&self) -> Result<Vec<TenantStatusView>, ControlError> {
        let bots = self.registry.list().await?;
        let mut views = Vec::with_capacity(bots.len());
        for bot in bots {
            let info = self.supervisor.process_info(&bot.tenant_id).await;
            views.push(TenantStatusView::new(bot, info));
        }
        Ok(views)
    }

    /// Start every tenant persisted as running and not suspended.
    ///
    /// Returns the number started. Failures are logged and persisted per
    /// tenant; one failing tenant does not block the others.
    pub async fn autostart(&self) -> Result<usize, ControlError> {
        let candidates: Vec<TenantBot> = self
            .registry
            .list()
            .await?
            .into_iter()
            .filter(TenantBot::wants_autostart)
            .collect();
        info!(count = candidates.len(), "Autostarting bots");

        let mut started = 0;
        for bot in candidates {
            match self.start_unthrottled(&bot.tenant_id).await {
                Ok(()) => started += 1,
                Err(e) => warn!(tenant_id = %bot.tenant_id, error = %e, "Autostart failed"),
            }
        }
        Ok(started)
    }

    async fn start_unthrottled(&self, tenant_id: &str) -> Result<(), ControlError> {
        let bot = self.fetch(tenant_id).await?;
        if bot.is_suspended {
            return Err(ControlError::Suspended(tenant_id.to_string()));
        }
        if self.supervisor.get_status(tenant_id).await.occupies_slot() {
            return Err(ControlError::AlreadyRunning(tenant_id.to_string()));
        }

        let result = self.supervisor.spawn(bot.config()).await;
        self.persist_spawn(tenant_id, result).await?;
        info!(tenant_id = %tenant_id, "Bot started by command");
        Ok(())
    }

    async fn persist_spawn(
        &self,
        tenant_id: &str,
        result: Result<(), SupervisorError>,
    ) -> Result<(), ControlError> {
        match result {
            Ok(()) => {
                self.registry.mark_started(tenant_id).await?;
                Ok(())
            }
            Err(SupervisorError::AlreadyRunning(id)) => Err(ControlError::AlreadyRunning(id)),
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Spawn failed");
                if let Err(persist) = self.registry.mark_failed(tenant_id, &e.to_string()).await {
                    warn!(tenant_id = %tenant_id, error = %persist, "Failed to persist spawn failure");
                }
                Err(e.into())
            }
        }
    }

    async fn fetch(&self, tenant_id: &str) -> Result<TenantBot, ControlError> {
        self.registry
            .get(tenant_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(tenant_id.to_string()))
    }

    async fn check_cooldown(&self, tenant_id: &str) -> Result<(), ControlError> {
        match &self.cooldown {
            Some(cooldown) => cooldown.check(tenant_id).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ControlError::NotFound("t".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ControlError::Suspended("t".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ControlError::AlreadyRunning("t".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ControlError::AlreadyStopped("t".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ControlError::RateLimited {
                tenant_id: "t".into(),
                retry_after: 5
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ControlError::Supervisor(SupervisorError::NotFound("t".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ControlError::RateLimited {
            tenant_id: "t".into(),
            retry_after: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
    }

    #[test]
    fn test_health_mapping() {
        let info = |status, restart_count| ProcessInfo {
            status,
            pid: None,
            started_at: None,
            restart_count,
            respawn_pending: false,
        };
        assert_eq!(Health::of(Some(&info(ProcessStatus::Running, 0))), Health::Healthy);
        assert_eq!(Health::of(Some(&info(ProcessStatus::Running, 2))), Health::Degraded);
        assert_eq!(Health::of(Some(&info(ProcessStatus::Starting, 0))), Health::Starting);
        assert_eq!(Health::of(Some(&info(ProcessStatus::Error, 5))), Health::Failed);
        assert_eq!(Health::of(Some(&info(ProcessStatus::Stopped, 1))), Health::Offline);
        assert_eq!(Health::of(None), Health::Offline);
    }
}
