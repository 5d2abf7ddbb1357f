// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guildhall SDK - the bot side of a supervised tenant process.
//!
//! The orchestrator launches one bot process per tenant, passes its settings
//! through `BOT_*` environment variables and talks to it over stdio. This
//! crate covers the bot's half of that contract.
//!
//! # Quick Start
//!
//! ```ignore
//! use guildhall_sdk::{BotEnvironment, SupervisorLink};
//!
//! #[tokio::main]
//! async fn main() -> guildhall_sdk::Result<()> {
//!     let env = BotEnvironment::from_env()?;
//!     let mut link = SupervisorLink::stdio();
//!
//!     // Log in to Discord with env.token ...
//!     link.ready(guild_count).await?;
//!
//!     link.wait_for_shutdown().await?;
//!     // Disconnect cleanly, then exit 0
//!     Ok(())
//! }
//! ```
//!
//! # Rules for bots
//!
//! - stdout belongs to the protocol. Log to stderr.
//! - Exit with status 0 after a requested shutdown. Any other exit is
//!   treated as a crash and may be respawned.
//! - Prefix every shared-cache key with `cache_prefix`; [`cooldown_store`]
//!   does this for you.
//!
//! # Modules
//!
//! - [`config`]: Environment contract
//! - [`link`]: IPC with the supervisor
//! - [`cache`]: Tenant-scoped cooldown counters
//! - [`error`]: Error types

#![deny(missing_docs)]

/// Tenant-scoped cooldown counters with memory fallback.
pub mod cache;

/// Environment passed in by the supervisor.
pub mod config;

/// SDK error types.
pub mod error;

/// Stdio channel to the supervisor.
pub mod link;

pub use cache::{CooldownOptions, cooldown_store};
pub use config::BotEnvironment;
pub use error::{Result, SdkError};
pub use link::{LinkReceiver, LinkSender, SupervisorLink};
