// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cooldown store behaviour against a scripted backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use guildhall_resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitStatus, CooldownStore, CounterBackend,
    MemoryFallbackStore, MetricsRegistry, ResilienceError, ResilienceMetrics, Result, Served,
};
use tokio::sync::Mutex;

/// In-process stand-in for Redis that can be switched into a failing mode.
#[derive(Default)]
struct ScriptedBackend {
    counts: std::sync::Mutex<HashMap<String, u64>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            let err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
            return Err(ResilienceError::Cache(err));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterBackend for ScriptedBackend {
    async fn increment(&self, key: &str, _window: Duration) -> Result<u64> {
        self.check()?;
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn get_count(&self, key: &str) -> Result<u64> {
        self.check()?;
        Ok(self.counts.lock().unwrap().get(key).copied().unwrap_or(0))
    }

    async fn get_ttl(&self, _key: &str) -> Result<u64> {
        self.check()?;
        Ok(42)
    }
}

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new(
        "redis",
        CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 1,
        },
    )
}

fn store_with(backend: Arc<ScriptedBackend>) -> CooldownStore {
    CooldownStore::new(
        Some(backend),
        breaker(),
        Arc::new(Mutex::new(MemoryFallbackStore::new(100))),
    )
}

#[tokio::test(start_paused = true)]
async fn test_healthy_backend_serves_primary() {
    let backend = Arc::new(ScriptedBackend::default());
    let store = store_with(backend.clone());

    assert_eq!(
        store.increment("cmd:ping", Duration::from_secs(60)).await,
        (1, Served::Primary)
    );
    assert_eq!(
        store.increment("cmd:ping", Duration::from_secs(60)).await,
        (2, Served::Primary)
    );
    assert_eq!(store.get_ttl("cmd:ping").await, (42, Served::Primary));
    assert!(store.fallback().lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failures_fall_back_and_open_circuit() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.set_failing(true);
    let store = store_with(backend.clone());

    let window = Duration::from_secs(60);
    assert_eq!(store.increment("k", window).await, (1, Served::Fallback));
    assert_eq!(store.increment("k", window).await, (2, Served::Fallback));
    assert_eq!(store.breaker_state().await, CircuitStatus::Open);
    assert_eq!(backend.calls(), 2);

    // Open circuit: backend is not consulted at all.
    assert_eq!(store.increment("k", window).await, (3, Served::Fallback));
    assert_eq!(store.get_count("k").await, (3, Served::Fallback));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_reset_timeout() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.set_failing(true);
    let store = store_with(backend.clone());

    let window = Duration::from_secs(60);
    store.increment("k", window).await;
    store.increment("k", window).await;
    assert_eq!(store.breaker_state().await, CircuitStatus::Open);

    backend.set_failing(false);
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(store.increment("k", window).await, (1, Served::Primary));
    assert_eq!(store.breaker_state().await, CircuitStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_without_backend_everything_is_fallback() {
    let store = CooldownStore::new(
        None,
        breaker(),
        Arc::new(Mutex::new(MemoryFallbackStore::new(100))),
    );
    assert_eq!(
        store.increment("k", Duration::from_secs(10)).await,
        (1, Served::Fallback)
    );
    assert_eq!(store.get_ttl("k").await, (10, Served::Fallback));
    assert_eq!(store.breaker_state().await, CircuitStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_prefix_namespaces_keys() {
    let backend = Arc::new(ScriptedBackend::default());
    let a = store_with(backend.clone()).with_prefix("tenant-a:");
    let b = store_with(backend.clone()).with_prefix("tenant-b:");

    a.increment("cmd", Duration::from_secs(60)).await;
    a.increment("cmd", Duration::from_secs(60)).await;
    assert_eq!(b.increment("cmd", Duration::from_secs(60)).await.0, 1);
    assert_eq!(a.get_count("cmd").await.0, 2);
}

#[tokio::test(start_paused = true)]
async fn test_served_counter_is_exported() {
    let registry = MetricsRegistry::new();
    let metrics = ResilienceMetrics::new(&registry).unwrap();

    let backend = Arc::new(ScriptedBackend::default());
    let store = store_with(backend.clone()).with_metrics(metrics);

    store.increment("k", Duration::from_secs(60)).await;
    backend.set_failing(true);
    store.increment("k", Duration::from_secs(60)).await;

    let text = registry.encode_text().unwrap();
    assert!(text.contains("guildhall_cooldown_requests_total{served=\"primary\"} 1"));
    assert!(text.contains("guildhall_cooldown_requests_total{served=\"fallback\"} 1"));
}
