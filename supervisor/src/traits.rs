//! Trait definitions with mockall annotations for testing
//!
//! These are the seams between the control-plane components: the RPC
//! surface drives processes through `ProcessManager`, the readiness manager
//! reads health through `HealthView`, and streamed worker logs land in a
//! `LogSink`.

use async_trait::async_trait;
use shared::{HealthStatus, LogEntry};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorResult;

/// Lifecycle control over configured service processes
#[mockall::automock]
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Launch the named service; fails if it is already running
    async fn start_service(&self, name: &str) -> SupervisorResult<()>;

    /// Stop the named service within `grace_period`, or immediately when `force`
    async fn stop_service(
        &self,
        name: &str,
        cancel: CancellationToken,
        force: bool,
        grace_period: Duration,
    ) -> SupervisorResult<()>;

    async fn is_running(&self, name: &str) -> SupervisorResult<bool>;

    /// Names of every configured service
    fn service_names(&self) -> Vec<String>;
}

/// Read-only view of service health, keyed by configured service name
#[mockall::automock]
#[async_trait]
pub trait HealthView: Send + Sync {
    /// Best status among registered instances of `name`, `None` if none registered
    async fn health_by_name(&self, name: &str) -> Option<HealthStatus>;
}

/// Destination for log entries streamed in by workers
#[mockall::automock]
#[async_trait]
pub trait LogSink: Send + Sync {
    /// `service_name` is resolved from the entry's service id when known
    async fn ingest(&self, service_name: Option<String>, entry: LogEntry);
}
