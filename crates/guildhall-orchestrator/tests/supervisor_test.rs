// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the process supervisor, driven through the mock launcher.

mod common;

use std::sync::Arc;
use std::time::Duration;

use guildhall_orchestrator::launcher::MockLauncher;
use guildhall_orchestrator::metrics::SupervisorMetrics;
use guildhall_orchestrator::supervisor::{
    ProcessStatus, ProcessSupervisor, SupervisorError, SupervisorEvent,
};
use guildhall_protocol::{SupervisorMessage, env};
use guildhall_resilience::MetricsRegistry;

use common::*;

// ============================================================================
// Spawn
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_spawn_then_ready() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Starting);

    let child = launcher.latest("t1").unwrap();
    child.ready(3).await;
    let event = wait_for(&mut events, is_ready).await;
    assert_eq!(
        event,
        SupervisorEvent::Ready {
            tenant_id: "t1".to_string(),
            guilds: 3
        }
    );

    let info = sup.process_info("t1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Running);
    assert_eq!(info.pid, Some(child.pid));
    assert_eq!(info.restart_count, 0);
    assert!(info.started_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_spawn_rejects_duplicate() {
    let mut launcher = MockLauncher::new();
    launcher.launch_delay = Duration::from_millis(50);
    let launcher = Arc::new(launcher);
    let sup = supervisor(launcher.clone());

    let (a, b) = tokio::join!(sup.spawn(tenant("t1")), sup.spawn(tenant("t1")));

    let results = [a, b];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(SupervisorError::AlreadyRunning(id)) if id == "t1"))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(rejected, 1);
    assert_eq!(launcher.launch_count("t1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_spawn_while_running_rejected() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    let err = sup.spawn(tenant("t1")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
    assert_eq!(launcher.launch_count("t1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_child_environment() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    let child = launcher.latest("t1").unwrap();

    assert_eq!(child.env_var(env::TENANT_ID), Some("t1"));
    assert_eq!(child.env_var(env::CLIENT_ID), Some("client-t1"));
    assert_eq!(child.env_var(env::DATABASE_URL), Some("postgres://db/t1"));
    assert_eq!(child.env_var(env::CACHE_PREFIX), Some("t1:"));
    assert_eq!(
        child.env_var(env::HEALTH_SERVER),
        Some(env::HEALTH_SERVER_DISABLED)
    );
    assert_eq!(child.env_var(env::REDIS_URL), None);
    // The plaintext token travels separately from the logged environment.
    assert_eq!(child.env_var(env::TOKEN), None);
    assert_eq!(child.token(), "token-t1");
}

#[tokio::test(start_paused = true)]
async fn test_redis_url_forwarded() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = ProcessSupervisor::builder(launcher.clone(), cipher())
        .config(fast_config())
        .redis_url(Some("redis://cache:6379".to_string()))
        .build();

    sup.spawn(tenant("t1")).await.unwrap();
    let child = launcher.latest("t1").unwrap();
    assert_eq!(child.env_var(env::REDIS_URL), Some("redis://cache:6379"));
}

#[tokio::test(start_paused = true)]
async fn test_credential_failure_releases_reservation() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    let mut bad = tenant("t1");
    bad.encrypted_token = "v1:not-base64:???".to_string();
    let err = sup.spawn(bad).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Credential { ref tenant_id, .. } if tenant_id == "t1"));
    assert!(sup.process_info("t1").await.is_none());
    assert_eq!(launcher.launch_count("t1"), 0);

    sup.spawn(tenant("t1")).await.unwrap();
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Starting);
}

#[tokio::test(start_paused = true)]
async fn test_fork_failure_releases_reservation() {
    let launcher = Arc::new(MockLauncher::new());
    launcher.fail_next_launches(1);
    let sup = supervisor(launcher.clone());

    let err = sup.spawn(tenant("t1")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Fork { .. }));
    assert!(sup.process_info("t1").await.is_none());

    sup.spawn(tenant("t1")).await.unwrap();
    assert_eq!(launcher.launch_count("t1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_child_error_does_not_change_status() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    let child = launcher.latest("t1").unwrap();
    child.ready(1).await;
    child.report_error("gateway hiccup").await;

    let event = wait_for(&mut events, |e| matches!(e, SupervisorEvent::ChildError { .. })).await;
    assert_eq!(
        event,
        SupervisorEvent::ChildError {
            tenant_id: "t1".to_string(),
            message: "gateway hiccup".to_string()
        }
    );
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Running);
}

// ============================================================================
// Crash recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_crash_schedules_respawn() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    let first = launcher.latest("t1").unwrap();
    first.ready(1).await;
    wait_for(&mut events, is_ready).await;

    first.exit(1).await;
    let stopped = wait_for(&mut events, is_stopped).await;
    assert_eq!(
        stopped,
        SupervisorEvent::Stopped {
            tenant_id: "t1".to_string(),
            exit_code: Some(1),
            signal: None,
            intentional: false
        }
    );

    let scheduled = wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartScheduled { .. })
    })
    .await;
    assert_eq!(
        scheduled,
        SupervisorEvent::RestartScheduled {
            tenant_id: "t1".to_string(),
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );

    wait_for(&mut events, is_starting).await;
    assert_eq!(launcher.launch_count("t1"), 2);

    let info = sup.process_info("t1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Starting);
    assert_eq!(info.restart_count, 1);
    assert!(!info.respawn_pending);
    assert_eq!(info.pid, Some(launcher.latest("t1").unwrap().pid));
}

#[tokio::test(start_paused = true)]
async fn test_restarts_exhausted() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    let mut events = sup.subscribe();
    launcher.latest("t1").unwrap().exit(1).await;

    // max_restarts = 2: two respawns, each crashing again.
    for _ in 0..2 {
        wait_for(&mut events, is_starting).await;
        let info = sup.process_info("t1").await.unwrap();
        assert!(info.restart_count <= 2);
        launcher.latest("t1").unwrap().exit(1).await;
    }

    let event = wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartsExhausted { .. })
    })
    .await;
    assert_eq!(
        event,
        SupervisorEvent::RestartsExhausted {
            tenant_id: "t1".to_string(),
            restarts: 2
        }
    );

    let info = sup.process_info("t1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Error);
    assert_eq!(info.restart_count, 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(launcher.launch_count("t1"), 3);
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_spawn_after_exhaustion_keeps_count() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    let mut events = sup.subscribe();
    launcher.latest("t1").unwrap().exit(1).await;
    for _ in 0..2 {
        wait_for(&mut events, is_starting).await;
        launcher.latest("t1").unwrap().exit(1).await;
    }
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartsExhausted { .. })
    })
    .await;

    // An explicit spawn is allowed from ERROR but does not reset the loop.
    sup.spawn(tenant("t1")).await.unwrap();
    let info = sup.process_info("t1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Starting);
    assert_eq!(info.restart_count, 2);

    launcher.latest("t1").unwrap().exit(1).await;
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartsExhausted { .. })
    })
    .await;
    assert_eq!(launcher.launch_count("t1"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_clean_exit_is_not_respawned() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    launcher.latest("t1").unwrap().exit(0).await;
    wait_for(&mut events, is_stopped).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Stopped);
    assert_eq!(launcher.launch_count("t1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_respawn_failure_is_surfaced() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    launcher.fail_next_launches(1);
    launcher.latest("t1").unwrap().exit(1).await;

    let event = wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RespawnFailed { .. })
    })
    .await;
    assert_eq!(event.tenant_id(), "t1");

    let info = sup.process_info("t1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Error);
    assert_eq!(info.restart_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_metric_counts_respawns() {
    let registry = MetricsRegistry::new();
    let metrics = SupervisorMetrics::new(&registry).unwrap();
    let launcher = Arc::new(MockLauncher::new());
    let sup = ProcessSupervisor::builder(launcher.clone(), cipher())
        .config(fast_config())
        .metrics(metrics)
        .build();

    sup.spawn(tenant("t1")).await.unwrap();
    let mut events = sup.subscribe();
    launcher.latest("t1").unwrap().exit(1).await;
    wait_for(&mut events, is_starting).await;

    let text = registry.encode_text().unwrap();
    assert!(text.contains("guildhall_tenant_restarts_total 1"));
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_is_graceful() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    let child = launcher.latest("t1").unwrap();
    child.ready(1).await;
    wait_for(&mut events, is_ready).await;

    sup.stop("t1").await.unwrap();

    assert_eq!(child.received(), vec![SupervisorMessage::Shutdown]);
    assert!(!child.was_killed());
    assert!(sup.process_info("t1").await.is_none());
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Stopped);

    let event = wait_for(&mut events, is_stopped).await;
    assert_eq!(
        event,
        SupervisorEvent::Stopped {
            tenant_id: "t1".to_string(),
            exit_code: Some(0),
            signal: None,
            intentional: true
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_escalates_to_kill() {
    let launcher = Arc::new(MockLauncher::ignoring_shutdown());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    let child = launcher.latest("t1").unwrap();

    let before = tokio::time::Instant::now();
    sup.stop("t1").await.unwrap();

    assert!(before.elapsed() >= Duration::from_secs(1));
    assert!(child.was_killed());
    assert!(sup.process_info("t1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_killed_child_is_not_respawned() {
    let launcher = Arc::new(MockLauncher::ignoring_shutdown());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    sup.stop("t1").await.unwrap();

    let event = wait_for(&mut events, is_stopped).await;
    assert!(matches!(
        event,
        SupervisorEvent::Stopped {
            signal: Some(9),
            intentional: true,
            ..
        }
    ));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(launcher.launch_count("t1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_respawn() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    launcher.latest("t1").unwrap().exit(1).await;
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartScheduled { .. })
    })
    .await;
    assert!(sup.process_info("t1").await.unwrap().respawn_pending);

    sup.stop("t1").await.unwrap();
    assert!(sup.process_info("t1").await.is_none());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(launcher.launch_count("t1"), 1);
    assert!(sup.process_info("t1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_launch_kills_new_process() {
    let mut launcher = MockLauncher::new();
    launcher.launch_delay = Duration::from_secs(1);
    let launcher = Arc::new(launcher);
    let sup = supervisor(launcher.clone());

    let spawning = tokio::spawn({
        let sup = sup.clone();
        async move { sup.spawn(tenant("t1")).await }
    });
    while sup.get_status("t1").await != ProcessStatus::Starting {
        tokio::task::yield_now().await;
    }

    sup.stop("t1").await.unwrap();
    assert!(sup.process_info("t1").await.is_none());

    let result = spawning.await.unwrap();
    assert!(matches!(result, Err(SupervisorError::Cancelled(_))));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(launcher.latest("t1").unwrap().was_killed());
    assert!(sup.process_info("t1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_respawn_launch_leaves_nothing() {
    let mut launcher = MockLauncher::new();
    launcher.launch_delay = Duration::from_secs(1);
    let launcher = Arc::new(launcher);
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    launcher.latest("t1").unwrap().exit(1).await;
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartScheduled { .. })
    })
    .await;

    // The respawn has reserved the slot and is inside the slow launch.
    while sup.process_info("t1").await.is_some_and(|i| i.respawn_pending) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Starting);

    sup.stop("t1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(sup.process_info("t1").await.is_none());
    assert_eq!(launcher.launch_count("t1"), 2);
    assert!(launcher.latest("t1").unwrap().was_killed());
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SupervisorEvent::RespawnFailed { .. }),
            "unexpected {event:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_racing_respawn_always_wins() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let ids: Vec<String> = (0..24).map(|i| format!("t{i}")).collect();

    for id in &ids {
        sup.spawn(tenant(id)).await.unwrap();
    }

    // Crash everything, then stop each tenant around its respawn deadline.
    let mut tasks = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        launcher.latest(id).unwrap().exit(1).await;
        let sup = sup.clone();
        let id = id.clone();
        let offset = Duration::from_millis(90 + (i as u64 % 6) * 4);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(offset).await;
            sup.stop(&id).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    for id in &ids {
        assert!(
            sup.process_info(id).await.is_none(),
            "{id} still tracked after stop"
        );
        assert!(launcher.launch_count(id) <= 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_spawn_right_after_stop_gets_fresh_budget() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    let stopping = tokio::spawn({
        let sup = sup.clone();
        async move { sup.stop("t1").await }
    });

    // Spawn as soon as the exit is seen, before the stop has cleaned up.
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::Stopped { intentional: true, .. })
    })
    .await;
    sup.spawn(tenant("t1")).await.unwrap();
    stopping.await.unwrap().unwrap();

    let info = sup.process_info("t1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Starting);
    assert_eq!(info.restart_count, 0);

    // The new process still gets crash recovery.
    launcher.latest("t1").unwrap().exit(1).await;
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartScheduled { attempt: 1, .. })
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_untracked_is_noop() {
    let sup = supervisor(Arc::new(MockLauncher::new()));
    sup.stop("nobody").await.unwrap();
    assert_eq!(sup.get_status("nobody").await, ProcessStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_error_record() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    let mut events = sup.subscribe();
    launcher.latest("t1").unwrap().exit(1).await;
    for _ in 0..2 {
        wait_for(&mut events, is_starting).await;
        launcher.latest("t1").unwrap().exit(1).await;
    }
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartsExhausted { .. })
    })
    .await;

    sup.stop("t1").await.unwrap();
    assert!(sup.process_info("t1").await.is_none());

    sup.spawn(tenant("t1")).await.unwrap();
    assert_eq!(sup.process_info("t1").await.unwrap().restart_count, 0);
}

// ============================================================================
// Restart, messaging, shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_restart_replaces_process() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    let first = launcher.latest("t1").unwrap();

    sup.restart("t1").await.unwrap();

    assert!(first.has_exited());
    let second = launcher.latest("t1").unwrap();
    assert!(second.generation > first.generation);
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Starting);
    assert_eq!(launcher.launch_count("t1"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_untracked_is_not_found() {
    let sup = supervisor(Arc::new(MockLauncher::new()));
    let err = sup.restart("nobody").await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_send_message_requires_running() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    assert!(!sup.send_message("t1", SupervisorMessage::Shutdown).await);

    sup.spawn(tenant("t1")).await.unwrap();
    assert!(!sup.send_message("t1", SupervisorMessage::Shutdown).await);

    launcher.latest("t1").unwrap().ready(1).await;
    wait_for(&mut events, is_ready).await;
    assert!(sup.send_message("t1", SupervisorMessage::Shutdown).await);

    // The bot honours the shutdown and exits cleanly; nothing respawns it.
    let event = wait_for(&mut events, is_stopped).await;
    assert!(matches!(
        event,
        SupervisorEvent::Stopped {
            exit_code: Some(0),
            intentional: false,
            ..
        }
    ));
    assert_eq!(sup.get_status("t1").await, ProcessStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_everything() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());

    sup.spawn(tenant("t1")).await.unwrap();
    sup.spawn(tenant("t2")).await.unwrap();
    assert_eq!(sup.tracked().await, vec!["t1".to_string(), "t2".to_string()]);

    sup.shutdown().await;

    assert!(sup.tracked().await.is_empty());
    assert!(launcher.latest("t1").unwrap().has_exited());
    assert!(launcher.latest("t2").unwrap().has_exited());
}

#[tokio::test(start_paused = true)]
async fn test_status_counts() {
    let launcher = Arc::new(MockLauncher::new());
    let sup = supervisor(launcher.clone());
    let mut events = sup.subscribe();

    sup.spawn(tenant("t1")).await.unwrap();
    sup.spawn(tenant("t2")).await.unwrap();
    launcher.latest("t1").unwrap().ready(1).await;
    wait_for(&mut events, is_ready).await;

    let counts = sup.status_counts().await;
    let count = |status| counts.iter().find(|(s, _)| *s == status).unwrap().1;
    assert_eq!(count(ProcessStatus::Running), 1);
    assert_eq!(count(ProcessStatus::Starting), 1);
    assert_eq!(count(ProcessStatus::Error), 0);
}
