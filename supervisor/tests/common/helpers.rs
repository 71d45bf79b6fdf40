//! Test helpers for supervisor integration tests
//!
//! `SupervisorBuilder` starts a real supervisor on an ephemeral port with
//! fast timings; `TestHelpers` holds polling and assertion utilities.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use shared::{HealthUpdate, ServiceDescriptor};
use supervisor::config::{HealthConfig, ReadinessConfig, SupervisorConfig};
use supervisor::rpc::HealthWatch;
use supervisor::services::OutputMode;
use supervisor::{ControlPlaneClient, Supervisor};

/// Builder for supervisors under test
pub struct SupervisorBuilder {
    config: SupervisorConfig,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            config: SupervisorConfig {
                listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                health: HealthConfig {
                    sweep_interval: Duration::from_millis(50),
                    heartbeat_timeout: Duration::from_secs(30),
                    subscriber_capacity: 100,
                },
                readiness: ReadinessConfig {
                    poll_interval: Duration::from_millis(20),
                    log_throttle: Duration::from_secs(20),
                },
                stop_grace_period: Duration::from_secs(2),
                autostart: false,
                child_output: OutputMode::Discard,
                ..SupervisorConfig::default()
            },
        }
    }

    pub fn with_services(mut self, services: Vec<ServiceDescriptor>) -> Self {
        self.config.services = services;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.health.heartbeat_timeout = timeout;
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.config.autostart = autostart;
        self
    }

    pub fn with_config<F>(mut self, adjust: F) -> Self
    where
        F: FnOnce(SupervisorConfig) -> SupervisorConfig,
    {
        self.config = adjust(self.config);
        self
    }

    /// Start the supervisor and connect a client to it
    pub async fn start(self) -> (Supervisor, ControlPlaneClient) {
        TestHelpers::init_tracing();
        let mut supervisor = Supervisor::new(self.config).expect("valid test configuration");
        let addr = supervisor.start().await.expect("supervisor starts");
        (supervisor, ControlPlaneClient::new(addr))
    }
}

/// Polling and assertion helpers
pub struct TestHelpers;

impl TestHelpers {
    pub const WAIT: Duration = Duration::from_secs(5);

    /// Install a test-writer subscriber once; later calls are no-ops
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("warn")
            .try_init();
    }

    /// Poll `check` until it holds, panicking after `WAIT`
    pub async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let polled = tokio::time::timeout(Self::WAIT, async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "timed out waiting for {what}");
    }

    /// Wait until the server has attached `count` watch subscribers
    pub async fn wait_for_subscribers(supervisor: &Supervisor, count: usize) {
        let health = supervisor.health().clone();
        Self::eventually("watch subscription", move || {
            let health = health.clone();
            async move { health.subscriber_count().await == count }
        })
        .await;
    }

    /// Next update from a watch, panicking if none arrives in time
    pub async fn next_update(watch: &mut HealthWatch) -> HealthUpdate {
        tokio::time::timeout(Self::WAIT, watch.next())
            .await
            .expect("health update in time")
            .expect("watch stream readable")
            .expect("watch stream open")
    }

    /// Assert no update arrives within `window`
    pub async fn assert_quiet(watch: &mut HealthWatch, window: Duration) {
        if let Ok(update) = tokio::time::timeout(window, watch.next()).await {
            panic!("unexpected health update: {update:?}");
        }
    }
}
