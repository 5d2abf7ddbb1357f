// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock launcher for testing.
//!
//! Launches nothing. Each launch produces a [`MockChild`] that tests use to
//! play the bot's side of the protocol: report ready, report errors, exit
//! with a chosen code. By default a mock child exits with code 0 when it
//! receives `shutdown`, like a well-behaved bot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use guildhall_protocol::{ChildMessage, SupervisorMessage};
use tokio::sync::mpsc;

use super::traits::*;

/// Test-side handle to a launched mock process.
#[derive(Debug, Clone)]
pub struct MockChild {
    /// Tenant identifier
    pub tenant_id: String,
    /// Supervisor generation of this launch
    pub generation: u64,
    /// Fake pid
    pub pid: u32,
    /// Environment the supervisor asked for
    pub env: Vec<(String, String)>,
    token: crate::cipher::Secret,
    events: mpsc::Sender<ChildEvent>,
    received: Arc<Mutex<Vec<SupervisorMessage>>>,
    exited: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
}

impl MockChild {
    /// Send `ready`.
    pub async fn ready(&self, guilds: u64) {
        let _ = self
            .events
            .send(ChildEvent::Message(ChildMessage::Ready { guilds }))
            .await;
    }

    /// Send `error`.
    pub async fn report_error(&self, message: impl Into<String>) {
        let _ = self
            .events
            .send(ChildEvent::Message(ChildMessage::Error {
                message: message.into(),
            }))
            .await;
    }

    /// Exit with `code`. Returns false if the child already exited.
    pub async fn exit(&self, code: i32) -> bool {
        self.finish(ExitInfo::exited(code)).await
    }

    /// Messages received from the supervisor so far.
    pub fn received(&self) -> Vec<SupervisorMessage> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the supervisor forcibly killed this child.
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Whether the child has exited.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Plaintext credential the child was given.
    pub fn token(&self) -> &str {
        self.token.expose()
    }

    /// Look up an environment variable the child was given.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    async fn finish(&self, exit: ExitInfo) -> bool {
        if self.exited.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.events.send(ChildEvent::Exited(exit)).await;
        true
    }
}

#[derive(Default)]
struct MockState {
    children: Vec<MockChild>,
    next_pid: u32,
    fail_launches: u32,
}

/// Mock launcher for testing.
pub struct MockLauncher {
    state: Arc<Mutex<MockState>>,
    /// Guild count reported automatically right after launch
    pub auto_ready: Option<u64>,
    /// Exit code used when a child receives `shutdown`; `None` ignores it
    pub exit_on_shutdown: Option<i32>,
    /// Simulated launch latency
    pub launch_delay: Duration,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// Create a mock launcher with well-behaved children.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_pid: 4000,
                ..MockState::default()
            })),
            auto_ready: None,
            exit_on_shutdown: Some(0),
            launch_delay: Duration::ZERO,
        }
    }

    /// Children that ignore `shutdown` and only die when killed.
    pub fn ignoring_shutdown() -> Self {
        Self {
            exit_on_shutdown: None,
            ..Self::new()
        }
    }

    /// Fail the next `n` launches with a spawn error.
    pub fn fail_next_launches(&self, n: u32) {
        self.lock().fail_launches = n;
    }

    /// All children launched for `tenant_id`, oldest first.
    pub fn children(&self, tenant_id: &str) -> Vec<MockChild> {
        self.lock()
            .children
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Most recent child launched for `tenant_id`.
    pub fn latest(&self, tenant_id: &str) -> Option<MockChild> {
        self.children(tenant_id).pop()
    }

    /// Number of launches for `tenant_id`.
    pub fn launch_count(&self, tenant_id: &str) -> usize {
        self.children(tenant_id).len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    fn launcher_type(&self) -> &'static str {
        "mock"
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedChild> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        let pid = {
            let mut state = self.lock();
            if state.fail_launches > 0 {
                state.fail_launches -= 1;
                return Err(LaunchError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "mock launch failure",
                )));
            }
            state.next_pid += 1;
            state.next_pid
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(64);
        let kill = KillSwitch::new();

        let child = MockChild {
            tenant_id: spec.tenant_id,
            generation: spec.generation,
            pid,
            env: spec.env,
            token: spec.token,
            events: events_tx,
            received: Arc::new(Mutex::new(Vec::new())),
            exited: Arc::new(AtomicBool::new(false)),
            killed: Arc::new(AtomicBool::new(false)),
        };
        self.lock().children.push(child.clone());

        if let Some(guilds) = self.auto_ready {
            child.ready(guilds).await;
        }

        let exit_on_shutdown = self.exit_on_shutdown;
        let kill_switch = kill.clone();
        tokio::spawn(async move {
            let mut outbound_open = true;
            loop {
                tokio::select! {
                    msg = outbound_rx.recv(), if outbound_open => {
                        let Some(msg) = msg else {
                            // A dropped channel does not end the process; only a kill does.
                            outbound_open = false;
                            continue;
                        };
                        child
                            .received
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(msg);
                        if msg == SupervisorMessage::Shutdown
                            && let Some(code) = exit_on_shutdown
                        {
                            child.exit(code).await;
                        }
                    }
                    _ = kill_switch.killed() => {
                        if !child.has_exited() {
                            child.killed.store(true, Ordering::SeqCst);
                            child.finish(ExitInfo::killed(9)).await;
                        }
                        break;
                    }
                }
            }
        });

        Ok(LaunchedChild {
            pid: Some(pid),
            outbound: outbound_tx,
            events: events_rx,
            kill,
        })
    }
}
