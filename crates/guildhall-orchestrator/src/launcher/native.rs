// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native process launcher.
//!
//! Runs the bot executable directly as a child of the orchestrator:
//!
//! - stdin carries [`SupervisorMessage`] lines to the bot
//! - stdout carries [`ChildMessage`] lines from the bot
//! - stderr is forwarded line by line into the orchestrator's log,
//!   tagged with the tenant id
//!
//! The `Exited` event is sent only after stdout has been drained (bounded
//! by a short timeout), so every message the bot wrote before exiting is
//! delivered first.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use guildhall_protocol::{ChildMessage, LineReader, LineWriter, SupervisorMessage, env};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::traits::*;

const OUTBOUND_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 64;
const STDOUT_DRAIN: Duration = Duration::from_secs(1);

/// Launches bots as native OS processes.
pub struct NativeLauncher {
    command: PathBuf,
    args: Vec<String>,
}

impl NativeLauncher {
    /// Create a launcher for `command`.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Set arguments passed to every launch.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Launcher for NativeLauncher {
    fn launcher_type(&self) -> &'static str {
        "native"
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedChild> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(env::TOKEN, spec.token.expose())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pid = child.id().ok_or(LaunchError::MissingPid)?;

        info!(
            tenant_id = %spec.tenant_id,
            generation = spec.generation,
            pid,
            command = %self.command.display(),
            "Spawned bot process"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let kill = KillSwitch::new();

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(forward_outbound(stdin, outbound_rx, spec.tenant_id.clone()));
        }

        if let Some(stderr) = child.stderr.take() {
            let tenant_id = spec.tenant_id.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = Vec::new();
                // Bytes, not String: a non-UTF-8 line must not stop the drain.
                while let Ok(n) = reader.read_until(b'\n', &mut line).await {
                    if n == 0 {
                        break;
                    }
                    let text = String::from_utf8_lossy(&line);
                    info!(target: "guildhall_orchestrator::child", tenant_id = %tenant_id, pid, "{}", text.trim_end());
                    line.clear();
                }
            });
        }

        let reader = child.stdout.take().map(|stdout| {
            let events = events_tx.clone();
            let tenant_id = spec.tenant_id.clone();
            tokio::spawn(async move {
                let mut reader = LineReader::new(stdout);
                loop {
                    match reader.next::<ChildMessage>().await {
                        Ok(Some(msg)) => {
                            if events.send(ChildEvent::Message(msg)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(tenant_id = %tenant_id, pid, error = %e, "Stopped reading bot stdout");
                            break;
                        }
                    }
                }
            })
        });

        let kill_switch = kill.clone();
        let tenant_id = spec.tenant_id.clone();
        tokio::spawn(async move {
            let exit = wait_for_exit(&mut child, &kill_switch, &tenant_id, pid).await;
            if let Some(reader) = reader
                && tokio::time::timeout(STDOUT_DRAIN, reader).await.is_err()
            {
                debug!(tenant_id = %tenant_id, pid, "Bot stdout still open after exit");
            }
            info!(
                tenant_id = %tenant_id,
                pid,
                exit_code = ?exit.code,
                signal = ?exit.signal,
                "Bot process exited"
            );
            let _ = events_tx.send(ChildEvent::Exited(exit)).await;
        });

        Ok(LaunchedChild {
            pid: Some(pid),
            outbound: outbound_tx,
            events: events_rx,
            kill,
        })
    }
}

async fn forward_outbound(
    stdin: ChildStdin,
    mut outbound: mpsc::Receiver<SupervisorMessage>,
    tenant_id: String,
) {
    let mut writer = LineWriter::new(stdin);
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = writer.send(&msg).await {
            debug!(tenant_id = %tenant_id, error = %e, "Bot stdin closed");
            break;
        }
    }
}

async fn wait_for_exit(child: &mut Child, kill: &KillSwitch, tenant_id: &str, pid: u32) -> ExitInfo {
    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => exit_info(status),
                    Err(e) => {
                        error!(tenant_id = %tenant_id, pid, error = %e, "Failed to wait for bot process");
                        ExitInfo::default()
                    }
                };
            }
            _ = kill.killed() => {
                warn!(tenant_id = %tenant_id, pid, "Killing bot process");
                if let Err(e) = child.start_kill() {
                    warn!(tenant_id = %tenant_id, pid, error = %e, "Failed to send kill");
                }
            }
        }
    }
}

#[cfg(unix)]
fn exit_info(status: ExitStatus) -> ExitInfo {
    use std::os::unix::process::ExitStatusExt;
    ExitInfo {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn exit_info(status: ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
        signal: None,
    }
}
