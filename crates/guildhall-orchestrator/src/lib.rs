// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guildhall Orchestrator - Tenant Bot Supervision
//!
//! Runs one isolated bot process per tenant, recovers crashed bots with a
//! bounded number of respawns, and exposes start/stop/restart over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Dashboard / operators                           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                  │ HTTP (port 8090)
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 guildhall-orchestrator (This Crate)                  │
//! │  ┌──────────────┐   ┌───────────────────┐   ┌────────────────────┐  │
//! │  │   Control    │──►│ ProcessSupervisor │──►│  Launcher (native) │  │
//! │  │   Surface    │   └─────────┬─────────┘   └─────────┬──────────┘  │
//! │  └──────┬───────┘             │ events                │             │
//! │         │              ┌──────▼───────┐               │             │
//! │         │              │ RegistrySync │               │             │
//! │         │              └──────┬───────┘               │             │
//! └─────────┼─────────────────────┼───────────────────────┼─────────────┘
//!           ▼                     ▼                       ▼ stdio NDJSON
//! ┌──────────────────────────────────────┐   ┌──────────────────────────┐
//! │        PostgreSQL (tenant_bots)      │   │  Tenant bot processes    │
//! └──────────────────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! # Control API
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `GET /bots` | Registry rows joined with live process status |
//! | `GET /bots/{id}/status` | One tenant |
//! | `POST /bots/{id}/start` | Spawn, rejected if suspended or already running |
//! | `POST /bots/{id}/stop` | Graceful stop, kill after the grace window |
//! | `POST /bots/{id}/restart` | Stop then spawn |
//! | `GET /health` | Supervisor liveness |
//! | `GET /metrics` | Prometheus exposition |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `GUILDHALL_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `GUILDHALL_BOT_COMMAND` | Yes | - | Bot executable |
//! | `GUILDHALL_ENCRYPTION_KEY` | Yes | - | Base64 AES-256 key |
//! | `GUILDHALL_HTTP_PORT` | No | `8090` | Control API port |
//! | `GUILDHALL_BOT_ARGS` | No | - | Space separated bot arguments |
//! | `GUILDHALL_REDIS_URL` | No | - | Shared cache |
//! | `GUILDHALL_MAX_RESTARTS` | No | `5` | Respawns per crash loop |
//! | `GUILDHALL_RESTART_DELAY_MS` | No | `5000` | Delay before a respawn |
//! | `GUILDHALL_STOP_GRACE_SECS` | No | `10` | Grace before kill |
//! | `GUILDHALL_FALLBACK_MAX_ENTRIES` | No | `10000` | Cooldown fallback capacity |
//! | `GUILDHALL_AUTOSTART` | No | `true` | Restore running tenants on boot |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`supervisor`]: Process table, crash recovery, lifecycle events
//! - [`launcher`]: Process execution backends (native, mock)
//! - [`control`]: Command façade keeping supervisor and registry aligned
//! - [`registry`]: Persisted tenant rows
//! - [`sync`]: Mirrors autonomous transitions into the registry
//! - [`cipher`]: Tenant credential decryption
//! - [`server`]: HTTP control API
//! - [`runtime`]: Embeddable runtime

#![deny(missing_docs)]

/// Database migrations for the tenant registry.
pub mod migrations;

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for orchestrator operations.
pub mod error;

/// Tenant credential decryption.
pub mod cipher;

/// Persisted tenant registry (PostgreSQL and in-memory).
pub mod registry;

/// Process execution backends.
pub mod launcher;

/// Tenant process supervisor.
pub mod supervisor;

/// Supervisor metrics.
pub mod metrics;

/// Start/stop/restart command façade.
pub mod control;

/// Background worker persisting autonomous supervisor transitions.
pub mod sync;

/// HTTP control API.
pub mod server;

/// Embeddable runtime for guildhall-orchestrator.
pub mod runtime;

pub use config::Config;
pub use error::Error;
