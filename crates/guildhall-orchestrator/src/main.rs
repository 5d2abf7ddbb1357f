// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guildhall Orchestrator - Tenant Bot Supervision Server
//!
//! An HTTP server responsible for:
//! - Spawning one bot process per tenant
//! - Crash recovery with bounded respawns
//! - Keeping the tenant registry in step with live processes
//! - Command cooldowns that survive a Redis outage

use std::sync::Arc;

use guildhall_resilience::{
    CircuitBreaker, CircuitBreakerConfig, CooldownStore, CounterBackend, MemoryFallbackStore,
    MetricsRegistry, RedisCounterBackend, ResilienceMetrics,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use guildhall_orchestrator::cipher::AesGcmCipher;
use guildhall_orchestrator::config::Config;
use guildhall_orchestrator::launcher::{Launcher, NativeLauncher};
use guildhall_orchestrator::migrations;
use guildhall_orchestrator::registry::PostgresTenantRegistry;
use guildhall_orchestrator::runtime::OrchestratorRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guildhall_orchestrator=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        bot_command = %config.bot_command.display(),
        max_restarts = config.supervisor.max_restarts,
        "Starting Guildhall Orchestrator"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run(&pool).await?;

    info!("Database schema verified");

    let cipher = Arc::new(AesGcmCipher::from_base64_key(&config.encryption_key)?);

    let launcher = Arc::new(NativeLauncher::new(&config.bot_command).with_args(config.bot_args.clone()));
    info!(launcher_type = launcher.launcher_type(), "Launcher initialized");

    // Cooldown store: Redis when reachable, memory fallback otherwise
    let metrics = MetricsRegistry::new();
    let resilience_metrics = ResilienceMetrics::new(&metrics)?;

    let backend: Option<Arc<dyn CounterBackend>> = match &config.redis_url {
        Some(url) => match RedisCounterBackend::connect(url).await {
            Ok(backend) => {
                info!("Connected to Redis");
                Some(Arc::new(backend))
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, command cooldowns use memory only");
                None
            }
        },
        None => None,
    };

    let breaker = CircuitBreaker::new("redis", CircuitBreakerConfig::default())
        .with_metrics(resilience_metrics.clone());
    let fallback = MemoryFallbackStore::new(config.fallback_max_entries)
        .with_metrics(resilience_metrics.clone());
    let cooldown = CooldownStore::new(backend, breaker, Arc::new(Mutex::new(fallback)))
        .with_prefix("guildhall:")
        .with_metrics(resilience_metrics);

    let runtime = OrchestratorRuntime::builder()
        .registry(Arc::new(PostgresTenantRegistry::new(pool)))
        .launcher(launcher)
        .cipher(cipher)
        .supervisor_config(config.supervisor.clone())
        .bind_addr(config.http_addr)
        .metrics(metrics)
        .cooldown(Arc::new(cooldown))
        .redis_url(config.redis_url.clone())
        .autostart(config.autostart)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.bind_addr(), "Orchestrator ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Guildhall Orchestrator shut down");

    Ok(())
}
