// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment handed to a bot by the supervisor.

use std::env;
use std::fmt;

use guildhall_protocol::env as vars;
use zeroize::Zeroizing;

use crate::error::{Result, SdkError};

/// Settings a supervised bot receives at launch.
#[derive(Clone)]
pub struct BotEnvironment {
    /// Tenant this bot serves
    pub tenant_id: String,
    /// Discord bot token, wiped from memory on drop
    pub token: Zeroizing<String>,
    /// Public Discord application id
    pub client_id: String,
    /// Tenant database connection string
    pub database_url: String,
    /// Prefix for every shared-cache key this bot writes
    pub cache_prefix: String,
    /// Shared cache address, when the deployment has one
    pub redis_url: Option<String>,
    /// Whether the bot should run its own health endpoint (false when supervised)
    pub health_server: bool,
}

impl BotEnvironment {
    /// Load the environment contract from process variables.
    ///
    /// # Required Environment Variables
    /// - `BOT_TENANT_ID`
    /// - `BOT_TOKEN`
    /// - `BOT_CLIENT_ID`
    /// - `BOT_DATABASE_URL`
    ///
    /// # Optional Environment Variables
    /// - `BOT_CACHE_PREFIX` (default: `"{tenant_id}:"`)
    /// - `BOT_REDIS_URL`
    /// - `BOT_HEALTH_SERVER` (`disabled` turns the bot's health endpoint off)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load the environment contract through an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| SdkError::Config(format!("{key} is required")))
        };

        let tenant_id = required(vars::TENANT_ID)?;
        let token = Zeroizing::new(required(vars::TOKEN)?);
        let client_id = required(vars::CLIENT_ID)?;
        let database_url = required(vars::DATABASE_URL)?;

        let cache_prefix = lookup(vars::CACHE_PREFIX)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("{tenant_id}:"));
        let redis_url = lookup(vars::REDIS_URL).filter(|value| !value.is_empty());
        let health_server = lookup(vars::HEALTH_SERVER)
            .map(|value| value != vars::HEALTH_SERVER_DISABLED)
            .unwrap_or(true);

        Ok(Self {
            tenant_id,
            token,
            client_id,
            database_url,
            cache_prefix,
            redis_url,
            health_server,
        })
    }
}

impl fmt::Debug for BotEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotEnvironment")
            .field("tenant_id", &self.tenant_id)
            .field("token", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("database_url", &"<redacted>")
            .field("cache_prefix", &self.cache_prefix)
            .field("redis_url", &self.redis_url)
            .field("health_server", &self.health_server)
            .finish()
    }
}
