// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervisor metrics.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `guildhall_tenant_processes` | Gauge | `status` |
//! | `guildhall_tenant_restarts_total` | Counter | - |
//!
//! Registered on the same [`MetricsRegistry`] as the resilience families.

use prometheus::{IntCounter, IntGaugeVec, Opts};

use guildhall_resilience::{MetricsRegistry, Result};

use crate::supervisor::ProcessStatus;

/// Metric handles for the process supervisor.
#[derive(Clone)]
pub struct SupervisorMetrics {
    tenant_processes: IntGaugeVec,
    tenant_restarts_total: IntCounter,
}

impl SupervisorMetrics {
    /// Create the metric families and register them with `registry`.
    pub fn new(registry: &MetricsRegistry) -> Result<Self> {
        let tenant_processes = IntGaugeVec::new(
            Opts::new(
                "guildhall_tenant_processes",
                "Tracked tenant processes by supervisor status",
            ),
            &["status"],
        )?;
        registry
            .registry()
            .register(Box::new(tenant_processes.clone()))?;

        let tenant_restarts_total = IntCounter::new(
            "guildhall_tenant_restarts_total",
            "Automatic respawns scheduled after a crash",
        )?;
        registry
            .registry()
            .register(Box::new(tenant_restarts_total.clone()))?;

        Ok(Self {
            tenant_processes,
            tenant_restarts_total,
        })
    }

    /// Publish per-status process counts. Statuses absent from `counts` are
    /// reported as zero.
    pub fn set_process_counts(&self, counts: &[(ProcessStatus, usize)]) {
        for status in ProcessStatus::ALL {
            let count = counts
                .iter()
                .find(|(s, _)| *s == status)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            self.tenant_processes
                .with_label_values(&[status.as_str()])
                .set(count as i64);
        }
    }

    /// Count one scheduled respawn.
    pub fn inc_restarts(&self) {
        self.tenant_restarts_total.inc();
    }
}
