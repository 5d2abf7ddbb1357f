// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use guildhall_orchestrator::cipher::AesGcmCipher;
use guildhall_orchestrator::launcher::MockLauncher;
use guildhall_orchestrator::registry::{InMemoryTenantRegistry, NewTenantBot, TenantRegistry};
use guildhall_orchestrator::supervisor::{
    ProcessSupervisor, SupervisorConfig, SupervisorEvent, TenantConfig,
};

pub const TEST_KEY: [u8; 32] = [7u8; 32];

pub fn cipher() -> Arc<AesGcmCipher> {
    Arc::new(AesGcmCipher::from_key_bytes(&TEST_KEY).unwrap())
}

/// Short timings so crash loops finish quickly on a paused clock.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        max_restarts: 2,
        restart_delay: Duration::from_millis(100),
        stop_grace: Duration::from_secs(1),
        kill_wait: Duration::from_secs(1),
    }
}

pub fn tenant(id: &str) -> TenantConfig {
    TenantConfig {
        tenant_id: id.to_string(),
        encrypted_token: cipher().encrypt(&format!("token-{id}")).unwrap(),
        client_id: format!("client-{id}"),
        database_url: format!("postgres://db/{id}"),
        cache_prefix: format!("{id}:"),
    }
}

pub fn new_bot(id: &str) -> NewTenantBot {
    let config = tenant(id);
    NewTenantBot {
        tenant_id: config.tenant_id,
        client_id: config.client_id,
        encrypted_token: config.encrypted_token,
        database_url: config.database_url,
        cache_prefix: config.cache_prefix,
    }
}

pub fn supervisor(launcher: Arc<MockLauncher>) -> ProcessSupervisor {
    ProcessSupervisor::builder(launcher, cipher())
        .config(fast_config())
        .build()
}

pub async fn registry_with(ids: &[&str]) -> Arc<InMemoryTenantRegistry> {
    let registry = Arc::new(InMemoryTenantRegistry::new());
    for id in ids {
        registry.register(&new_bot(id)).await.unwrap();
    }
    registry
}

/// Receive events until one matches `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<SupervisorEvent>, pred: F) -> SupervisorEvent
where
    F: Fn(&SupervisorEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for supervisor event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

pub fn is_ready(event: &SupervisorEvent) -> bool {
    matches!(event, SupervisorEvent::Ready { .. })
}

pub fn is_starting(event: &SupervisorEvent) -> bool {
    matches!(event, SupervisorEvent::Starting { .. })
}

pub fn is_stopped(event: &SupervisorEvent) -> bool {
    matches!(event, SupervisorEvent::Stopped { .. })
}
