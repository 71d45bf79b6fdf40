//! End-to-end tests for the supervisor
//!
//! Each test starts a real supervisor on an ephemeral loopback port and
//! drives it through `ControlPlaneClient`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_test::assert_ok;

use shared::{CommandKind, HealthStatus, LogEntry, LogLevel, ServiceId};
use supervisor::config::ServiceManifest;
use supervisor::traits::ProcessManager;

mod common;
use common::{SupervisorBuilder, TestFixtures, TestHelpers};

async fn register(client: &supervisor::ControlPlaneClient, name: &str) -> ServiceId {
    let response = assert_ok!(client.register(TestFixtures::worker(name), vec!["rpc".into()]).await);
    assert!(response.success, "{}", response.message);
    response.service_id.expect("service id on success")
}

#[tokio::test]
async fn test_register_yields_fresh_id_in_starting() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;

    let response = assert_ok!(client.register(TestFixtures::worker("core"), vec![]).await);
    assert!(response.success);
    let id = response.service_id.unwrap();
    assert!(!id.as_str().is_empty());
    assert_eq!(
        response.initial_config.get("supervisor_addr"),
        Some(&client.addr().to_string())
    );

    let other = register(&client, "core").await;
    assert_ne!(id, other);

    let status = assert_ok!(client.get_service_status(id).await).expect("registered");
    assert_eq!(status.status, HealthStatus::Starting);
    assert_eq!(status.name, "core");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_unknown_service_status_is_none() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;

    let status = assert_ok!(client.get_service_status(ServiceId::from("ghost")).await);
    assert!(status.is_none());

    let heartbeat = assert_ok!(
        client
            .heartbeat(ServiceId::from("ghost"), HealthStatus::Healthy, HashMap::new())
            .await
    );
    assert!(!heartbeat.acknowledged);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_emit_only_on_change() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;
    let id = register(&client, "core").await;

    let mut watch = assert_ok!(client.watch(vec![]).await);
    TestHelpers::wait_for_subscribers(&supervisor, 1).await;

    for _ in 0..2 {
        let response = assert_ok!(client.heartbeat(id.clone(), HealthStatus::Healthy, HashMap::new()).await);
        assert!(response.acknowledged);
    }

    let update = TestHelpers::next_update(&mut watch).await;
    assert_eq!(update.service_id, id);
    assert_eq!(update.old_status, HealthStatus::Starting);
    assert_eq!(update.new_status, HealthStatus::Healthy);
    TestHelpers::assert_quiet(&mut watch, Duration::from_millis(200)).await;

    assert_ok!(client.heartbeat(id.clone(), HealthStatus::Degraded, HashMap::new()).await);
    let update = TestHelpers::next_update(&mut watch).await;
    assert_eq!(update.new_status, HealthStatus::Degraded);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_silent_service_marked_unhealthy_once() {
    let (mut supervisor, client) = SupervisorBuilder::new()
        .with_heartbeat_timeout(Duration::from_millis(300))
        .start()
        .await;
    let id = register(&client, "core").await;
    assert_ok!(client.heartbeat(id.clone(), HealthStatus::Healthy, HashMap::new()).await);

    let mut watch = assert_ok!(client.watch(vec![id.clone()]).await);
    TestHelpers::wait_for_subscribers(&supervisor, 1).await;

    let update = TestHelpers::next_update(&mut watch).await;
    assert_eq!(update.old_status, HealthStatus::Healthy);
    assert_eq!(update.new_status, HealthStatus::Unhealthy);
    TestHelpers::assert_quiet(&mut watch, Duration::from_millis(400)).await;

    let status = assert_ok!(client.get_service_status(id).await).unwrap();
    assert_eq!(status.status, HealthStatus::Unhealthy);
    assert!(status.last_healthy.is_some());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_watch_filter_excludes_other_services() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;
    let a = register(&client, "alpha").await;
    let b = register(&client, "beta").await;

    let mut only_a = assert_ok!(client.watch(vec![a.clone()]).await);
    let mut everything = assert_ok!(client.watch(vec![]).await);
    TestHelpers::wait_for_subscribers(&supervisor, 2).await;

    assert_ok!(client.heartbeat(b.clone(), HealthStatus::Healthy, HashMap::new()).await);
    assert_ok!(client.heartbeat(a.clone(), HealthStatus::Healthy, HashMap::new()).await);

    assert_eq!(TestHelpers::next_update(&mut everything).await.service_id, b);
    assert_eq!(TestHelpers::next_update(&mut everything).await.service_id, a);
    assert_eq!(TestHelpers::next_update(&mut only_a).await.service_id, a);
    TestHelpers::assert_quiet(&mut only_a, Duration::from_millis(200)).await;

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_dropped_watch_is_unsubscribed() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;

    let watch = assert_ok!(client.watch(vec![]).await);
    TestHelpers::wait_for_subscribers(&supervisor, 1).await;

    drop(watch);
    TestHelpers::wait_for_subscribers(&supervisor, 0).await;

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_unregister_emits_stopped() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;
    let id = register(&client, "core").await;

    let mut watch = assert_ok!(client.watch(vec![id.clone()]).await);
    TestHelpers::wait_for_subscribers(&supervisor, 1).await;

    let result = assert_ok!(client.unregister(id.clone(), "shutting down").await);
    assert!(result.success, "{}", result.message);

    let update = TestHelpers::next_update(&mut watch).await;
    assert_eq!(update.new_status, HealthStatus::Stopped);
    assert!(assert_ok!(client.get_service_status(id.clone()).await).is_none());

    let again = assert_ok!(client.unregister(id, "twice").await);
    assert!(!again.success);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_readiness_latch_over_required_services() {
    let (mut supervisor, client) = SupervisorBuilder::new()
        .with_services(TestFixtures::required_platform())
        .start()
        .await;

    let security = register(&client, TestFixtures::SECURITY).await;
    let core = register(&client, TestFixtures::CORE).await;
    assert_ok!(client.heartbeat(security.clone(), HealthStatus::Healthy, HashMap::new()).await);

    // core still STARTING
    tokio::time::sleep(Duration::from_millis(100)).await;
    let readiness = assert_ok!(client.is_system_ready().await);
    assert!(!readiness.ready);
    assert!(readiness.ready_at.is_none());

    assert_ok!(client.heartbeat(core.clone(), HealthStatus::Healthy, HashMap::new()).await);
    let handle = client.clone();
    TestHelpers::eventually("system readiness", move || {
        let handle = handle.clone();
        async move { handle.is_system_ready().await.map(|r| r.ready).unwrap_or(false) }
    })
    .await;

    // Latch holds even when a required service degrades afterwards
    assert_ok!(client.heartbeat(core, HealthStatus::Unhealthy, HashMap::new()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let readiness = assert_ok!(client.is_system_ready().await);
    assert!(readiness.ready);
    assert!(readiness.ready_at.is_some());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_ready_callbacks_before_and_after_readiness() {
    let (mut supervisor, client) = SupervisorBuilder::new()
        .with_services(vec![TestFixtures::worker(TestFixtures::CORE).required(true)])
        .start()
        .await;

    let (early_tx, early_rx) = oneshot::channel();
    supervisor
        .readiness()
        .on_ready(move || async move {
            let _ = early_tx.send(());
        })
        .await;

    let core = register(&client, TestFixtures::CORE).await;
    assert_ok!(client.heartbeat(core, HealthStatus::Degraded, HashMap::new()).await);
    assert_ok!(assert_ok!(tokio::time::timeout(TestHelpers::WAIT, early_rx).await));

    let (late_tx, late_rx) = oneshot::channel();
    supervisor
        .readiness()
        .on_ready(move || async move {
            let _ = late_tx.send(());
        })
        .await;
    assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_millis(500), late_rx).await));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_commands_delivered_on_next_heartbeat() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;
    let id = register(&client, "core").await;

    let queued = assert_ok!(client.send_command(id.clone(), CommandKind::Drain).await);
    assert!(queued.success, "{}", queued.message);
    let shutdown = CommandKind::Shutdown { grace_period_secs: 5 };
    assert_ok!(client.send_command(id.clone(), shutdown.clone()).await);

    let first = assert_ok!(client.heartbeat(id.clone(), HealthStatus::Healthy, HashMap::new()).await);
    let kinds: Vec<CommandKind> = first.commands.into_iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![CommandKind::Drain, shutdown]);

    let second = assert_ok!(client.heartbeat(id, HealthStatus::Healthy, HashMap::new()).await);
    assert!(second.commands.is_empty());

    let unknown = assert_ok!(client.send_command(ServiceId::from("ghost"), CommandKind::Drain).await);
    assert!(!unknown.success);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_list_services_filters() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;
    let core = register(&client, "core").await;
    register(&client, "core-indexer").await;
    register(&client, "security").await;
    assert_ok!(client.heartbeat(core.clone(), HealthStatus::Healthy, HashMap::new()).await);

    let all = assert_ok!(client.list_services(None, None).await);
    assert_eq!(all.len(), 3);

    let cores = assert_ok!(client.list_services(None, Some("core".into())).await);
    assert_eq!(cores.len(), 2);

    let healthy_cores = assert_ok!(
        client
            .list_services(Some(HealthStatus::Healthy), Some("core".into()))
            .await
    );
    assert_eq!(healthy_cores.len(), 1);
    assert_eq!(healthy_cores[0].service_id, core);

    let none = assert_ok!(client.list_services(Some(HealthStatus::Stopped), None).await);
    assert!(none.is_empty());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_streamed_logs_are_acknowledged_and_stored() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;
    let id = register(&client, "core").await;

    let mut stream = assert_ok!(client.stream_logs().await);
    for (level, message) in [
        (LogLevel::Info, "booting"),
        (LogLevel::Warn, "cache cold"),
        (LogLevel::Info, "serving"),
    ] {
        assert_ok!(stream.send(LogEntry::new(id.clone(), level, message)).await);
    }
    assert_eq!(stream.sent(), 3);

    let ack = assert_ok!(stream.finish().await);
    assert_eq!(ack.received, 3);

    let stored = supervisor.logs().recent(Some(&id), 10).await;
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].entry.message, "booting");
    assert_eq!(stored[2].service_name.as_deref(), Some("core"));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_empty_log_stream_acknowledges_zero() {
    let (mut supervisor, client) = SupervisorBuilder::new().start().await;

    let stream = assert_ok!(client.stream_logs().await);
    let ack = assert_ok!(stream.finish().await);
    assert_eq!(ack.received, 0);

    supervisor.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_and_stop_over_rpc() {
    let (mut supervisor, client) = SupervisorBuilder::new()
        .with_services(vec![TestFixtures::sleeper("sleeper"), TestFixtures::stubborn("stubborn")])
        .start()
        .await;

    let started = assert_ok!(client.start_service("sleeper").await);
    assert!(started.success, "{}", started.message);
    assert!(assert_ok!(supervisor.processes().is_running("sleeper").await));

    let twice = assert_ok!(client.start_service("sleeper").await);
    assert!(!twice.success);
    assert!(twice.message.contains("already running"));

    let stopped = assert_ok!(client.stop_service("sleeper", false, None).await);
    assert!(stopped.success, "{}", stopped.message);
    assert!(!assert_ok!(supervisor.processes().is_running("sleeper").await));

    let missing = assert_ok!(client.start_service("ghost").await);
    assert!(!missing.success);

    supervisor.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_reports_ungraceful_exit() {
    let (mut supervisor, client) = SupervisorBuilder::new()
        .with_services(vec![TestFixtures::stubborn("stubborn")])
        .start()
        .await;

    assert!(assert_ok!(client.start_service("stubborn").await).success);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    let stopped = assert_ok!(
        client
            .stop_service("stubborn", false, Some(Duration::from_millis(300)))
            .await
    );
    assert!(!stopped.success);
    assert!(stopped.message.contains("did not exit gracefully"), "{}", stopped.message);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!assert_ok!(supervisor.processes().is_running("stubborn").await));

    supervisor.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_manifest_autostart_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("services.json");
    std::fs::write(&path, TestFixtures::sleeper_manifest()).unwrap();
    let manifest = assert_ok!(ServiceManifest::load(&path));

    let (mut supervisor, client) = SupervisorBuilder::new()
        .with_config(|config| config.with_manifest(manifest))
        .with_autostart(true)
        .start()
        .await;

    let processes = Arc::clone(supervisor.processes());
    assert!(assert_ok!(processes.is_running("store").await));
    assert!(assert_ok!(processes.is_running("api").await));
    assert!(!assert_ok!(processes.is_running("batch").await));

    let registered = assert_ok!(client.register(TestFixtures::worker("store"), vec![]).await);
    assert_eq!(
        registered.initial_config.get("instance_group").map(String::as_str),
        Some("green")
    );

    let failures = supervisor.shutdown().await;
    assert!(failures.is_empty());
    assert!(!assert_ok!(processes.is_running("store").await));
    assert!(!assert_ok!(processes.is_running("api").await));
}
