// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP control API.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/bots` | status of every registered tenant |
//! | GET | `/bots/{tenant_id}/status` | one tenant, 404 if unknown |
//! | POST | `/bots/{tenant_id}/start` | `{tenantId, status: "starting"}` |
//! | POST | `/bots/{tenant_id}/stop` | `{tenantId, status: "stopped"}` |
//! | POST | `/bots/{tenant_id}/restart` | `{tenantId, status: "starting"}` |
//! | GET | `/health` | supervisor liveness |
//! | GET | `/metrics` | Prometheus text exposition |

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use guildhall_resilience::MetricsRegistry;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::control::{ControlError, ControlSurface, TenantStatusView};
use crate::metrics::SupervisorMetrics;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle commands
    pub control: ControlSurface,
    /// Metric families served on `/metrics`
    pub metrics: MetricsRegistry,
    /// Process gauges refreshed before each scrape
    pub supervisor_metrics: Option<SupervisorMetrics>,
    /// Server start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Create handler state.
    pub fn new(
        control: ControlSurface,
        metrics: MetricsRegistry,
        supervisor_metrics: Option<SupervisorMetrics>,
    ) -> Self {
        Self {
            control,
            metrics,
            supervisor_metrics,
            started_at: Instant::now(),
        }
    }
}

/// Build the control API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bots", get(list_bots))
        .route("/bots/{tenant_id}/status", get(bot_status))
        .route("/bots/{tenant_id}/start", post(start_bot))
        .route("/bots/{tenant_id}/stop", post(stop_bot))
        .route("/bots/{tenant_id}/restart", post(restart_bot))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the control API until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Control API listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("Control API shutting down");
        })
        .await
}

async fn list_bots(State(state): State<AppState>) -> Result<Json<Vec<TenantStatusView>>, ControlError> {
    Ok(Json(state.control.list_statuses().await?))
}

async fn bot_status(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantStatusView>, ControlError> {
    Ok(Json(state.control.status(&tenant_id).await?))
}

async fn start_bot(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, ControlError> {
    state.control.start(&tenant_id).await?;
    Ok(Json(json!({ "tenantId": tenant_id, "status": "starting" })))
}

async fn stop_bot(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, ControlError> {
    state.control.stop(&tenant_id).await?;
    Ok(Json(json!({ "tenantId": tenant_id, "status": "stopped" })))
}

async fn restart_bot(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, ControlError> {
    state.control.restart(&tenant_id).await?;
    Ok(Json(json!({ "tenantId": tenant_id, "status": "starting" })))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let tracked = state.control.supervisor().tracked().await.len();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeMs": state.started_at.elapsed().as_millis() as u64,
        "trackedProcesses": tracked,
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(supervisor_metrics) = &state.supervisor_metrics {
        let counts = state.control.supervisor().status_counts().await;
        supervisor_metrics.set_process_counts(&counts);
    }

    match state.metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
