// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guildhall Example Bot
//!
//! Stands in for a real Discord bot so the orchestrator can be run end to
//! end without Discord credentials. It reads the supervisor's environment,
//! reports ready and waits for shutdown.
//!
//! ## Running under the orchestrator
//!
//! ```bash
//! cargo build -p guildhall-example-bot
//! GUILDHALL_BOT_COMMAND=target/debug/guildhall-example-bot cargo run -p guildhall-orchestrator
//! ```
//!
//! ## Simulating failures
//!
//! - `EXAMPLE_BOT_GUILDS` - guild count reported in the ready message (default: 1)
//! - `EXAMPLE_BOT_CRASH_AFTER_SECS` - exit with status 1 after this many
//!   seconds, to watch crash recovery

use std::time::Duration;

use anyhow::Context;
use guildhall_sdk::{BotEnvironment, CooldownOptions, SupervisorLink, cooldown_store};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is the IPC channel; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guildhall_example_bot=info,guildhall_sdk=info".into()),
        )
        .init();

    let env = BotEnvironment::from_env().context("bot must be launched by the orchestrator")?;
    let guilds: u64 = std::env::var("EXAMPLE_BOT_GUILDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let crash_after = std::env::var("EXAMPLE_BOT_CRASH_AFTER_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs);

    info!(
        tenant_id = %env.tenant_id,
        client_id = %env.client_id,
        cache_prefix = %env.cache_prefix,
        "Starting example bot"
    );

    let cooldowns = cooldown_store(&env, CooldownOptions::default()).await;
    let (count, served) = cooldowns
        .increment("startup", Duration::from_secs(60))
        .await;
    info!(count, served = served.as_str(), "Recorded startup");

    let (mut receiver, mut sender) = SupervisorLink::stdio().split();
    sender.ready(guilds).await?;

    let crash = async {
        match crash_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = receiver.wait_for_shutdown() => result?,
        result = tokio::signal::ctrl_c() => {
            result?;
            warn!("Interrupted");
        }
        _ = crash => {
            error!("Simulated crash");
            sender.error("simulated crash").await?;
            std::process::exit(1);
        }
    }

    info!(tenant_id = %env.tenant_id, "Example bot stopped");
    Ok(())
}
