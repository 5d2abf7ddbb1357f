// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circuit breaker for the shared cache.
//!
//! The breaker never observes the dependency itself. Callers ask
//! [`CircuitBreaker::can_execute`] before a call and report the outcome with
//! [`CircuitBreaker::record_success`] / [`CircuitBreaker::record_failure`].
//! A caller that skips `record_failure` after a failed call silently keeps
//! the breaker closed.
//!
//! The OPEN -> HALF_OPEN transition is lazy: it happens on the first
//! `can_execute` call after `reset_timeout`, not on a timer.
//!
//! The breaker is plain data with `&mut self` methods. Share it behind a
//! lock (see [`crate::cooldown::CooldownStore`]).

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::metrics::ResilienceMetrics;

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before opening.
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed.
    pub reset_timeout: Duration,
    /// Consecutive HALF_OPEN successes required to close.
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 3,
        }
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// Calls flow through.
    Closed,
    /// Probing whether the dependency recovered.
    HalfOpen,
    /// Calls are refused.
    Open,
}

impl CircuitStatus {
    /// Numeric value exported as a gauge.
    pub fn gauge_value(self) -> i64 {
        match self {
            CircuitStatus::Closed => 0,
            CircuitStatus::HalfOpen => 1,
            CircuitStatus::Open => 2,
        }
    }

    /// Status string.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitStatus::Closed => "CLOSED",
            CircuitStatus::HalfOpen => "HALF_OPEN",
            CircuitStatus::Open => "OPEN",
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone)]
pub struct CircuitState {
    /// Breaker name (the protected dependency).
    pub name: String,
    /// Current position.
    pub state: CircuitStatus,
    /// Failures since the last reset.
    pub consecutive_failures: u32,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<Instant>,
    /// Successes recorded in the current HALF_OPEN episode.
    pub half_open_successes: u32,
}

/// A named failure-rate gate.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: CircuitStatus,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_successes: u32,
    metrics: Option<ResilienceMetrics>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: CircuitStatus::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            half_open_successes: 0,
            metrics: None,
        }
    }

    /// Export state and failures through `metrics`.
    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        metrics.set_circuit_state(&self.name, self.state.gauge_value());
        self.metrics = Some(metrics);
        self
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current position (does not trigger the lazy OPEN -> HALF_OPEN move).
    pub fn state(&self) -> CircuitStatus {
        self.state
    }

    /// Snapshot of all counters.
    pub fn snapshot(&self) -> CircuitState {
        CircuitState {
            name: self.name.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure_at: self.last_failure_at,
            half_open_successes: self.half_open_successes,
        }
    }

    /// Whether a call to the dependency is permitted right now.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => true,
            CircuitStatus::Open => {
                let elapsed = self
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.half_open_successes = 0;
                    self.transition(CircuitStatus::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful call.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitStatus::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitStatus::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.half_open_requests {
                    self.consecutive_failures = 0;
                    self.half_open_successes = 0;
                    self.transition(CircuitStatus::Closed);
                }
            }
            // A call admitted before the breaker opened; it says nothing
            // about the current episode.
            CircuitStatus::Open => {}
        }
    }

    /// Report a failed call.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(Instant::now());
        if let Some(metrics) = &self.metrics {
            metrics.inc_circuit_failures(&self.name);
        }

        match self.state {
            CircuitStatus::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.transition(CircuitStatus::Open);
                }
            }
            CircuitStatus::HalfOpen => {
                self.half_open_successes = 0;
                self.transition(CircuitStatus::Open);
            }
            CircuitStatus::Open => {}
        }
    }

    /// Manually open the breaker (restarts the reset timeout).
    pub fn force_open(&mut self) {
        self.last_failure_at = Some(Instant::now());
        self.half_open_successes = 0;
        self.transition(CircuitStatus::Open);
    }

    /// Manually close the breaker and clear counters.
    pub fn force_closed(&mut self) {
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.transition(CircuitStatus::Closed);
    }

    fn transition(&mut self, to: CircuitStatus) {
        let from = self.state;
        self.state = to;
        if let Some(metrics) = &self.metrics {
            metrics.set_circuit_state(&self.name, to.gauge_value());
        }
        if from == to {
            return;
        }
        match to {
            CircuitStatus::Open => warn!(
                breaker = %self.name,
                from = %from,
                failures = self.consecutive_failures,
                "Circuit opened"
            ),
            _ => info!(breaker = %self.name, from = %from, to = %to, "Circuit state changed"),
        }
    }
}
