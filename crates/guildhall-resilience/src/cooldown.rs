// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Breaker-guarded cooldown counters.
//!
//! [`CooldownStore`] is the one place that honours the breaker contract:
//! every primary call is preceded by `can_execute` and followed by
//! `record_success` or `record_failure`. Refused or failed calls are served
//! by the shared [`MemoryFallbackStore`], so callers always get a count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitStatus};
use crate::error::Result;
use crate::fallback_store::MemoryFallbackStore;
use crate::metrics::ResilienceMetrics;

/// Primary counter storage (normally Redis).
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Increment `key`, setting its expiry to `window` only when it has none.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64>;

    /// Current value of `key`, 0 if missing.
    async fn get_count(&self, key: &str) -> Result<u64>;

    /// Whole seconds until `key` expires, 0 if missing.
    async fn get_ttl(&self, key: &str) -> Result<u64>;
}

/// Redis-backed counters (`INCR` + `EXPIRE NX` in one transaction).
#[derive(Clone)]
pub struct RedisCounterBackend {
    conn: ConnectionManager,
}

impl RedisCounterBackend {
    /// Connect to `url` through a reconnecting connection manager.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CounterBackend for RedisCounterBackend {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let (count, _): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window.as_secs().max(1))
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get_count(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.unwrap_or(0))
    }

    async fn get_ttl(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        // -2: missing, -1: no expiry
        Ok(ttl.max(0) as u64)
    }
}

/// Which store answered a cooldown call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// The shared cache.
    Primary,
    /// The in-memory fallback.
    Fallback,
}

impl Served {
    /// Label value used in metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Served::Primary => "primary",
            Served::Fallback => "fallback",
        }
    }
}

/// Cooldown / rate-limit counters with degraded-mode fallback.
pub struct CooldownStore {
    backend: Option<Arc<dyn CounterBackend>>,
    breaker: Mutex<CircuitBreaker>,
    fallback: Arc<Mutex<MemoryFallbackStore>>,
    prefix: String,
    metrics: Option<ResilienceMetrics>,
}

impl CooldownStore {
    /// Create a store. With no backend every call is served by `fallback`.
    pub fn new(
        backend: Option<Arc<dyn CounterBackend>>,
        breaker: CircuitBreaker,
        fallback: Arc<Mutex<MemoryFallbackStore>>,
    ) -> Self {
        Self {
            backend,
            breaker: Mutex::new(breaker),
            fallback,
            prefix: String::new(),
            metrics: None,
        }
    }

    /// Prepend `prefix` to every key (tenant cache namespace).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Count served calls through `metrics`.
    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared fallback store (for the sweeper).
    pub fn fallback(&self) -> Arc<Mutex<MemoryFallbackStore>> {
        self.fallback.clone()
    }

    /// Current breaker position.
    pub async fn breaker_state(&self) -> CircuitStatus {
        self.breaker.lock().await.state()
    }

    /// Increment `key` within `window`.
    pub async fn increment(&self, key: &str, window: Duration) -> (u64, Served) {
        let key = self.key(key);
        if let Some(backend) = self.admitted_backend().await {
            let result = backend.increment(&key, window).await;
            if let Some(count) = self.settle(result).await {
                return self.served(count, Served::Primary);
            }
        }
        let count = self.fallback.lock().await.increment(&key, window);
        self.served(count, Served::Fallback)
    }

    /// Current count for `key`.
    pub async fn get_count(&self, key: &str) -> (u64, Served) {
        let key = self.key(key);
        if let Some(backend) = self.admitted_backend().await {
            let result = backend.get_count(&key).await;
            if let Some(count) = self.settle(result).await {
                return self.served(count, Served::Primary);
            }
        }
        let count = self.fallback.lock().await.get_count(&key);
        self.served(count, Served::Fallback)
    }

    /// Seconds until `key` expires.
    pub async fn get_ttl(&self, key: &str) -> (u64, Served) {
        let key = self.key(key);
        if let Some(backend) = self.admitted_backend().await {
            let result = backend.get_ttl(&key).await;
            if let Some(ttl) = self.settle(result).await {
                return self.served(ttl, Served::Primary);
            }
        }
        let ttl = self.fallback.lock().await.get_ttl(&key);
        self.served(ttl, Served::Fallback)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn admitted_backend(&self) -> Option<Arc<dyn CounterBackend>> {
        let backend = self.backend.as_ref()?;
        if self.breaker.lock().await.can_execute() {
            Some(backend.clone())
        } else {
            debug!("Cache circuit open, serving from fallback");
            None
        }
    }

    async fn settle(&self, result: Result<u64>) -> Option<u64> {
        let mut breaker = self.breaker.lock().await;
        match result {
            Ok(value) => {
                breaker.record_success();
                Some(value)
            }
            Err(e) => {
                warn!(breaker = %breaker.name(), error = %e, "Cache call failed, serving from fallback");
                breaker.record_failure();
                None
            }
        }
    }

    fn served(&self, value: u64, served: Served) -> (u64, Served) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_cooldown_requests(served.as_str());
        }
        (value, served)
    }
}
