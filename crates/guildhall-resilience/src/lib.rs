// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guildhall Resilience - degraded-mode protection for the shared cache
//!
//! Cooldowns and rate limits normally live in Redis so every process sees
//! the same counters. When Redis is unreachable those checks must keep
//! working, just less precisely. This crate provides the pieces:
//!
//! ```text
//!   caller ──► CooldownStore ──► CircuitBreaker::can_execute()
//!                    │                 │ yes                │ no
//!                    │                 ▼                    ▼
//!                    │          CounterBackend (Redis)   MemoryFallbackStore
//!                    │                 │ error ─────────────►│
//!                    │                 ▼                     │
//!                    └──── record_success / record_failure ◄─┘
//! ```
//!
//! # Circuit States
//!
//! ```text
//!            failure_threshold consecutive failures
//!   CLOSED ───────────────────────────────────────► OPEN
//!     ▲                                              │
//!     │ half_open_requests successes                 │ reset_timeout elapsed,
//!     │                                              │ next can_execute()
//!     └──────────────── HALF_OPEN ◄──────────────────┘
//!                          │ any failure
//!                          └───────────────────────► OPEN
//! ```
//!
//! # Modules
//!
//! - [`circuit_breaker`]: Failure-rate gate, one instance per dependency
//! - [`fallback_store`]: Bounded, self-expiring counter map
//! - [`sweeper`]: Background purge of expired fallback entries
//! - [`cooldown`]: Breaker-guarded counter store with transparent fallback
//! - [`metrics`]: Prometheus gauges and counters for all of the above

#![deny(missing_docs)]

/// Failure-rate gate protecting calls to a dependency.
pub mod circuit_breaker;

/// Breaker-guarded counter store with in-memory fallback.
pub mod cooldown;

/// Error types for resilience operations.
pub mod error;

/// Bounded, self-expiring in-memory counter map.
pub mod fallback_store;

/// Prometheus metrics registry.
pub mod metrics;

/// Background worker purging expired fallback entries.
pub mod sweeper;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use cooldown::{CooldownStore, CounterBackend, RedisCounterBackend, Served};
pub use error::{ResilienceError, Result};
pub use fallback_store::MemoryFallbackStore;
pub use metrics::{MetricsRegistry, ResilienceMetrics};
pub use sweeper::FallbackSweeper;
