// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for guildhall-orchestrator.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::supervisor::SupervisorConfig;

/// Orchestrator configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Tenant registry database URL
    pub database_url: String,
    /// HTTP control API address
    pub http_addr: SocketAddr,
    /// Bot executable launched once per tenant
    pub bot_command: PathBuf,
    /// Extra arguments for the bot executable
    pub bot_args: Vec<String>,
    /// Base64 AES-256 key for tenant credentials
    pub encryption_key: Zeroizing<String>,
    /// Shared cache address, forwarded to bots and used for command cooldowns
    pub redis_url: Option<String>,
    /// Crash-recovery and stop timing
    pub supervisor: SupervisorConfig,
    /// Capacity of the in-memory cooldown fallback
    pub fallback_max_entries: usize,
    /// Start tenants that were running when the orchestrator last stopped
    pub autostart: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("http_addr", &self.http_addr)
            .field("bot_command", &self.bot_command)
            .field("bot_args", &self.bot_args)
            .field("encryption_key", &"<redacted>")
            .field("redis_configured", &self.redis_url.is_some())
            .field("supervisor", &self.supervisor)
            .field("fallback_max_entries", &self.fallback_max_entries)
            .field("autostart", &self.autostart)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("GUILDHALL_DATABASE_URL")
            .ok_or(ConfigError::MissingEnvVar("GUILDHALL_DATABASE_URL"))?;

        let port: u16 = lookup("GUILDHALL_HTTP_PORT")
            .unwrap_or_else(|| "8090".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let bot_command = PathBuf::from(
            lookup("GUILDHALL_BOT_COMMAND")
                .ok_or(ConfigError::MissingEnvVar("GUILDHALL_BOT_COMMAND"))?,
        );
        let bot_args = lookup("GUILDHALL_BOT_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let encryption_key = Zeroizing::new(
            lookup("GUILDHALL_ENCRYPTION_KEY")
                .ok_or(ConfigError::MissingEnvVar("GUILDHALL_ENCRYPTION_KEY"))?,
        );

        let redis_url = lookup("GUILDHALL_REDIS_URL").filter(|v| !v.is_empty());

        let defaults = SupervisorConfig::default();
        let supervisor = SupervisorConfig {
            max_restarts: parse_or(&lookup, "GUILDHALL_MAX_RESTARTS", defaults.max_restarts)?,
            restart_delay: Duration::from_millis(parse_or(
                &lookup,
                "GUILDHALL_RESTART_DELAY_MS",
                defaults.restart_delay.as_millis() as u64,
            )?),
            stop_grace: Duration::from_secs(parse_or(
                &lookup,
                "GUILDHALL_STOP_GRACE_SECS",
                defaults.stop_grace.as_secs(),
            )?),
            kill_wait: defaults.kill_wait,
        };

        let fallback_max_entries = parse_or(
            &lookup,
            "GUILDHALL_FALLBACK_MAX_ENTRIES",
            guildhall_resilience::fallback_store::DEFAULT_MAX_ENTRIES,
        )?;

        let autostart = lookup("GUILDHALL_AUTOSTART")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            http_addr,
            bot_command,
            bot_args,
            encryption_key,
            redis_url,
            supervisor,
            fallback_max_entries,
            autostart,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A numeric variable could not be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}
