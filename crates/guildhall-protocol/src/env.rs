// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment variables passed from the supervisor to each bot process.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `BOT_TENANT_ID` | Tenant identifier |
//! | `BOT_TOKEN` | Decrypted Discord bot token (never written anywhere else) |
//! | `BOT_CLIENT_ID` | Public Discord application id |
//! | `BOT_DATABASE_URL` | Tenant database connection string |
//! | `BOT_CACHE_PREFIX` | Key namespace for the shared cache |
//! | `BOT_HEALTH_SERVER` | `disabled` when supervised; the supervisor reports health |
//! | `BOT_REDIS_URL` | Shared cache address (only set when one is configured) |

/// Tenant identifier.
pub const TENANT_ID: &str = "BOT_TENANT_ID";
/// Plaintext bot credential.
pub const TOKEN: &str = "BOT_TOKEN";
/// Public client id.
pub const CLIENT_ID: &str = "BOT_CLIENT_ID";
/// Database connection string.
pub const DATABASE_URL: &str = "BOT_DATABASE_URL";
/// Cache key namespace prefix.
pub const CACHE_PREFIX: &str = "BOT_CACHE_PREFIX";
/// Health server switch.
pub const HEALTH_SERVER: &str = "BOT_HEALTH_SERVER";
/// Shared cache address.
pub const REDIS_URL: &str = "BOT_REDIS_URL";

/// Value of [`HEALTH_SERVER`] that turns the bot's own health endpoint off.
pub const HEALTH_SERVER_DISABLED: &str = "disabled";
