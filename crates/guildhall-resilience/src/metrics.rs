// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prometheus metrics for degraded-mode visibility.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `guildhall_circuit_state` | Gauge (CLOSED=0, HALF_OPEN=1, OPEN=2) | `name` |
//! | `guildhall_circuit_failures_total` | Counter | `name` |
//! | `guildhall_fallback_entries` | Gauge | - |
//! | `guildhall_fallback_evictions_total` | Counter | - |
//! | `guildhall_cooldown_requests_total` | Counter | `served` |
//!
//! Other crates register their own families against the same
//! [`MetricsRegistry`] so a single `/metrics` scrape returns everything.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Shared Prometheus registry with text encoding.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    registry: Registry,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    /// Access the underlying registry to register additional families.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all registered metrics in the text exposition format.
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Metric handles for breakers, the fallback store and the cooldown store.
///
/// Cheap to clone; all handles share the registered collectors.
#[derive(Clone)]
pub struct ResilienceMetrics {
    circuit_state: IntGaugeVec,
    circuit_failures_total: IntCounterVec,
    fallback_entries: IntGauge,
    fallback_evictions_total: IntCounter,
    cooldown_requests_total: IntCounterVec,
}

impl ResilienceMetrics {
    /// Create the metric families and register them with `registry`.
    pub fn new(registry: &MetricsRegistry) -> Result<Self> {
        let circuit_state = IntGaugeVec::new(
            Opts::new(
                "guildhall_circuit_state",
                "Circuit breaker state (0=closed, 1=half_open, 2=open)",
            ),
            &["name"],
        )?;
        registry.registry().register(Box::new(circuit_state.clone()))?;

        let circuit_failures_total = IntCounterVec::new(
            Opts::new(
                "guildhall_circuit_failures_total",
                "Failures reported to a circuit breaker",
            ),
            &["name"],
        )?;
        registry
            .registry()
            .register(Box::new(circuit_failures_total.clone()))?;

        let fallback_entries = IntGauge::new(
            "guildhall_fallback_entries",
            "Entries currently held by the in-memory fallback store",
        )?;
        registry.registry().register(Box::new(fallback_entries.clone()))?;

        let fallback_evictions_total = IntCounter::new(
            "guildhall_fallback_evictions_total",
            "Fallback entries evicted due to capacity pressure",
        )?;
        registry
            .registry()
            .register(Box::new(fallback_evictions_total.clone()))?;

        let cooldown_requests_total = IntCounterVec::new(
            Opts::new(
                "guildhall_cooldown_requests_total",
                "Cooldown counter operations by the store that served them",
            ),
            &["served"],
        )?;
        registry
            .registry()
            .register(Box::new(cooldown_requests_total.clone()))?;

        Ok(Self {
            circuit_state,
            circuit_failures_total,
            fallback_entries,
            fallback_evictions_total,
            cooldown_requests_total,
        })
    }

    /// Publish the numeric state of the named breaker.
    pub fn set_circuit_state(&self, name: &str, value: i64) {
        self.circuit_state.with_label_values(&[name]).set(value);
    }

    /// Count one failure reported to the named breaker.
    pub fn inc_circuit_failures(&self, name: &str) {
        self.circuit_failures_total.with_label_values(&[name]).inc();
    }

    /// Publish the fallback store's current size.
    pub fn set_fallback_entries(&self, entries: usize) {
        self.fallback_entries.set(entries as i64);
    }

    /// Count capacity evictions.
    pub fn add_fallback_evictions(&self, evicted: usize) {
        self.fallback_evictions_total.inc_by(evicted as u64);
    }

    /// Count a cooldown operation served by `served` (`primary` or `fallback`).
    pub fn inc_cooldown_requests(&self, served: &str) {
        self.cooldown_requests_total
            .with_label_values(&[served])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_families() {
        let registry = MetricsRegistry::new();
        let metrics = ResilienceMetrics::new(&registry).unwrap();

        metrics.set_circuit_state("redis", 2);
        metrics.inc_circuit_failures("redis");
        metrics.set_fallback_entries(7);
        metrics.add_fallback_evictions(3);
        metrics.inc_cooldown_requests("fallback");

        let text = registry.encode_text().unwrap();
        assert!(text.contains("guildhall_circuit_state{name=\"redis\"} 2"));
        assert!(text.contains("guildhall_circuit_failures_total{name=\"redis\"} 1"));
        assert!(text.contains("guildhall_fallback_entries 7"));
        assert!(text.contains("guildhall_fallback_evictions_total 3"));
        assert!(text.contains("guildhall_cooldown_requests_total{served=\"fallback\"} 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = MetricsRegistry::new();
        ResilienceMetrics::new(&registry).unwrap();
        assert!(ResilienceMetrics::new(&registry).is_err());
    }
}
