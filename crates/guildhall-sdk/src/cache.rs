// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant-scoped cooldown counters.
//!
//! Every bot shares one Redis with every other tenant, so keys are
//! namespaced with [`BotEnvironment::cache_prefix`]. When Redis is
//! missing or unreachable the store falls back to process memory.

use std::sync::Arc;

use guildhall_resilience::{
    CircuitBreaker, CircuitBreakerConfig, CooldownStore, CounterBackend, MemoryFallbackStore,
    RedisCounterBackend, fallback_store::DEFAULT_MAX_ENTRIES,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BotEnvironment;

/// Cooldown store options.
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    /// Breaker thresholds for the Redis backend
    pub breaker: CircuitBreakerConfig,
    /// Fallback store capacity
    pub fallback_max_entries: usize,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            fallback_max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Build a cooldown store for this tenant.
///
/// Connects to `BOT_REDIS_URL` when set. A failed connection is logged and
/// the store serves from memory only.
pub async fn cooldown_store(env: &BotEnvironment, options: CooldownOptions) -> CooldownStore {
    let backend: Option<Arc<dyn CounterBackend>> = match &env.redis_url {
        Some(url) => match RedisCounterBackend::connect(url).await {
            Ok(backend) => {
                info!(tenant_id = %env.tenant_id, "Connected to shared cache");
                Some(Arc::new(backend))
            }
            Err(e) => {
                warn!(
                    tenant_id = %env.tenant_id,
                    error = %e,
                    "Shared cache unavailable, cooldowns use memory only"
                );
                None
            }
        },
        None => None,
    };

    let breaker = CircuitBreaker::new("redis", options.breaker);
    let fallback = MemoryFallbackStore::new(options.fallback_max_entries);
    CooldownStore::new(backend, breaker, Arc::new(Mutex::new(fallback)))
        .with_prefix(env.cache_prefix.clone())
}
