//! Control-plane RPC handlers
//!
//! Transport-independent: each method takes a request message and returns the
//! response message. Caller errors never fail the call itself, they come back
//! as `success: false` with a message.

use shared::{
    process_debug, process_info, process_warn, CommandKind, HeartbeatRequest, HeartbeatResponse,
    ListServicesRequest, LogEntry, OperationResult, ProcessId, RegisterRequest, RegisterResponse,
    RpcRequest, RpcResponse, ServiceCommand, ServiceId, ServiceStatus, StartServiceRequest,
    StopServiceRequest, SystemReadiness, UnregisterRequest, WatchRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::{HealthMonitor, ReadinessManager, ServiceRegistry, Subscription, SubscriptionId};
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::{LogSink, ProcessManager};

pub struct ControlPlane {
    registry: Arc<ServiceRegistry>,
    health: Arc<HealthMonitor>,
    processes: Arc<dyn ProcessManager>,
    readiness: Arc<ReadinessManager>,
    logs: Arc<dyn LogSink>,
    /// Used when a stop request carries no grace period
    default_grace_period: Duration,
}

impl ControlPlane {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        health: Arc<HealthMonitor>,
        processes: Arc<dyn ProcessManager>,
        readiness: Arc<ReadinessManager>,
        logs: Arc<dyn LogSink>,
        default_grace_period: Duration,
    ) -> Self {
        Self {
            registry,
            health,
            processes,
            readiness,
            logs,
            default_grace_period,
        }
    }

    /// Dispatch a single-response call.
    ///
    /// Streaming calls are owned by the transport and rejected here.
    pub async fn handle_unary(&self, request: RpcRequest, cancel: &CancellationToken) -> RpcResponse {
        match request {
            RpcRequest::Register(req) => RpcResponse::Registered(self.register(req).await),
            RpcRequest::Unregister(req) => RpcResponse::Result(self.unregister(req).await),
            RpcRequest::StartService(req) => RpcResponse::Result(self.start_service(req).await),
            RpcRequest::StopService(req) => RpcResponse::Result(self.stop_service(req, cancel).await),
            RpcRequest::GetServiceStatus { service_id } => {
                let (status, message) = self.get_service_status(&service_id).await;
                RpcResponse::Status { status, message }
            }
            RpcRequest::ListServices(req) => RpcResponse::Services(self.list_services(&req).await),
            RpcRequest::Heartbeat(req) => RpcResponse::Heartbeat(self.heartbeat(req).await),
            RpcRequest::SendCommand { service_id, command } => {
                RpcResponse::Result(self.send_command(&service_id, command).await)
            }
            RpcRequest::IsSystemReady => RpcResponse::Readiness(self.system_readiness().await),
            other @ (RpcRequest::WatchServiceHealth(_) | RpcRequest::StreamLogs | RpcRequest::LogEntry(_)) => {
                RpcResponse::Error {
                    message: format!("{} is a streaming call", other.name()),
                }
            }
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> RegisterResponse {
        match self
            .registry
            .register_service(&request.descriptor, request.capabilities)
            .await
        {
            Ok((service_id, initial_config)) => RegisterResponse {
                success: true,
                message: format!("registered {}", request.descriptor.name),
                service_id: Some(service_id),
                initial_config,
            },
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Registration of {} rejected: {}", request.descriptor.name, e);
                RegisterResponse::failed(e.to_string())
            }
        }
    }

    pub async fn unregister(&self, request: UnregisterRequest) -> OperationResult {
        to_result(
            self.registry
                .unregister_service(&request.service_id, &request.reason)
                .await,
            format!("unregistered {}", request.service_id),
        )
    }

    pub async fn start_service(&self, request: StartServiceRequest) -> OperationResult {
        let result = async {
            let name = self.resolve_target(&request.service).await?;
            self.processes.start_service(&name).await?;
            Ok::<_, SupervisorError>(name)
        }
        .await;

        match result {
            Ok(name) => OperationResult::ok(format!("started {name}")),
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Start of {} failed: {}", request.service, e);
                OperationResult::failed(e.to_string())
            }
        }
    }

    pub async fn stop_service(&self, request: StopServiceRequest, cancel: &CancellationToken) -> OperationResult {
        let grace_period = request.grace_period.unwrap_or(self.default_grace_period);
        let result = async {
            let name = self.resolve_target(&request.service).await?;
            self.processes
                .stop_service(&name, cancel.clone(), request.force, grace_period)
                .await?;
            Ok::<_, SupervisorError>(name)
        }
        .await;

        match result {
            Ok(name) => OperationResult::ok(format!("stopped {name}")),
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Stop of {} failed: {}", request.service, e);
                OperationResult::failed(e.to_string())
            }
        }
    }

    pub async fn get_service_status(&self, service_id: &ServiceId) -> (Option<ServiceStatus>, String) {
        match self.registry.get_service_status(service_id).await {
            Ok(status) => (Some(status), String::new()),
            Err(e) => (None, e.to_string()),
        }
    }

    pub async fn list_services(&self, request: &ListServicesRequest) -> Vec<ServiceStatus> {
        self.registry.list_services(request).await
    }

    /// Record the heartbeat and hand back any queued commands
    pub async fn heartbeat(&self, request: HeartbeatRequest) -> HeartbeatResponse {
        let service_id = request.service_id;
        match self
            .registry
            .update_heartbeat(&service_id, request.status, request.metrics)
            .await
        {
            Ok(_) => {
                let commands = self.registry.take_pending_commands(&service_id).await;
                if !commands.is_empty() {
                    process_debug!(
                        ProcessId::current(),
                        "Delivering {} command(s) to {}",
                        commands.len(),
                        service_id
                    );
                }
                HeartbeatResponse {
                    acknowledged: true,
                    message: String::new(),
                    commands,
                }
            }
            Err(e) => HeartbeatResponse {
                acknowledged: false,
                message: e.to_string(),
                commands: Vec::new(),
            },
        }
    }

    pub async fn send_command(&self, service_id: &ServiceId, kind: CommandKind) -> OperationResult {
        let command = ServiceCommand::new(kind);
        let command_id = command.command_id.clone();
        to_result(
            self.registry.enqueue_command(service_id, command).await,
            format!("queued command {command_id}"),
        )
    }

    pub async fn system_readiness(&self) -> SystemReadiness {
        self.readiness.readiness().await
    }

    pub async fn watch(&self, request: WatchRequest) -> Subscription {
        process_info!(
            ProcessId::current(),
            "👀 Health watch opened ({} service filter(s))",
            request.service_ids.len()
        );
        self.health.subscribe(request.service_ids).await
    }

    pub async fn unwatch(&self, id: SubscriptionId) {
        if self.health.unsubscribe(id).await {
            process_info!(ProcessId::current(), "Health watch {:?} closed", id);
        }
    }

    pub async fn ingest_log(&self, entry: LogEntry) {
        let service_name = self.registry.name_of(&entry.service_id).await;
        self.logs.ingest(service_name, entry).await;
    }

    /// A configured service name, or the id of a registered service
    async fn resolve_target(&self, service: &str) -> SupervisorResult<String> {
        if self.processes.service_names().iter().any(|name| name == service) {
            return Ok(service.to_string());
        }

        self.registry
            .name_of(&ServiceId::from(service))
            .await
            .ok_or_else(|| SupervisorError::ServiceNotFound {
                service: service.to_string(),
            })
    }
}

fn to_result(result: SupervisorResult<()>, success_message: String) -> OperationResult {
    match result {
        Ok(()) => OperationResult::ok(success_message),
        Err(e) => OperationResult::failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, ReadinessConfig};
    use crate::traits::{MockHealthView, MockLogSink, MockProcessManager};
    use mockall::predicate::{always, eq};
    use shared::{HealthStatus, LogLevel, ServiceDescriptor};
    use std::collections::HashMap;

    fn control_plane(processes: MockProcessManager, logs: MockLogSink) -> ControlPlane {
        let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let registry = Arc::new(ServiceRegistry::new(Arc::clone(&health), HashMap::new()));
        let readiness = Arc::new(ReadinessManager::new(
            &[],
            Arc::new(MockHealthView::new()),
            ReadinessConfig::default(),
        ));
        ControlPlane::new(
            registry,
            health,
            Arc::new(processes),
            readiness,
            Arc::new(logs),
            Duration::from_secs(30),
        )
    }

    fn configured(names: &'static [&'static str]) -> MockProcessManager {
        let mut processes = MockProcessManager::new();
        processes
            .expect_service_names()
            .returning(move || names.iter().map(|n| n.to_string()).collect());
        processes
    }

    async fn register(control: &ControlPlane, name: &str) -> ServiceId {
        let response = control
            .register(RegisterRequest {
                descriptor: ServiceDescriptor::new(name, format!("/opt/{name}")),
                capabilities: vec![],
            })
            .await;
        assert!(response.success, "{}", response.message);
        response.service_id.unwrap()
    }

    #[tokio::test]
    async fn test_register_then_status_is_starting() {
        let control = control_plane(MockProcessManager::new(), MockLogSink::new());
        let id = register(&control, "core").await;

        let (status, _) = control.get_service_status(&id).await;
        assert_eq!(status.unwrap().status, HealthStatus::Starting);
    }

    #[tokio::test]
    async fn test_invalid_registration_is_success_false() {
        let control = control_plane(MockProcessManager::new(), MockLogSink::new());
        let response = control
            .register(RegisterRequest {
                descriptor: ServiceDescriptor::new("", "/opt/empty"),
                capabilities: vec![],
            })
            .await;
        assert!(!response.success);
        assert!(response.service_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_status_reports_not_found() {
        let control = control_plane(MockProcessManager::new(), MockLogSink::new());
        let (status, message) = control.get_service_status(&ServiceId::from("ghost")).await;
        assert!(status.is_none());
        assert!(message.contains("not found"));
    }

    #[tokio::test]
    async fn test_heartbeat_drains_commands_once() {
        let control = control_plane(MockProcessManager::new(), MockLogSink::new());
        let id = register(&control, "core").await;

        let queued = control.send_command(&id, CommandKind::ReloadConfig).await;
        assert!(queued.success);

        let heartbeat = || HeartbeatRequest {
            service_id: id.clone(),
            status: HealthStatus::Healthy,
            metrics: HashMap::new(),
        };
        let first = control.heartbeat(heartbeat()).await;
        assert!(first.acknowledged);
        assert_eq!(first.commands.len(), 1);
        assert_eq!(first.commands[0].kind, CommandKind::ReloadConfig);

        let second = control.heartbeat(heartbeat()).await;
        assert!(second.commands.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_service_not_acknowledged() {
        let control = control_plane(MockProcessManager::new(), MockLogSink::new());
        let response = control
            .heartbeat(HeartbeatRequest {
                service_id: ServiceId::from("ghost"),
                status: HealthStatus::Healthy,
                metrics: HashMap::new(),
            })
            .await;
        assert!(!response.acknowledged);
    }

    #[tokio::test]
    async fn test_start_by_configured_name() {
        let mut processes = configured(&["core"]);
        processes
            .expect_start_service()
            .with(eq("core"))
            .times(1)
            .returning(|_| Ok(()));
        let control = control_plane(processes, MockLogSink::new());

        let result = control
            .start_service(StartServiceRequest { service: "core".into() })
            .await;
        assert!(result.success, "{}", result.message);
    }

    #[tokio::test]
    async fn test_start_by_registered_id_resolves_name() {
        let mut processes = configured(&["core"]);
        processes
            .expect_start_service()
            .with(eq("core"))
            .times(1)
            .returning(|_| Ok(()));
        let control = control_plane(processes, MockLogSink::new());
        let id = register(&control, "core").await;

        let result = control
            .start_service(StartServiceRequest { service: id.to_string() })
            .await;
        assert!(result.success, "{}", result.message);
    }

    #[tokio::test]
    async fn test_start_unknown_service_fails_softly() {
        let control = control_plane(configured(&["core"]), MockLogSink::new());
        let result = control
            .start_service(StartServiceRequest { service: "ghost".into() })
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_stop_uses_default_grace_period() {
        let mut processes = configured(&["core"]);
        processes
            .expect_stop_service()
            .with(eq("core"), always(), eq(false), eq(Duration::from_secs(30)))
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let control = control_plane(processes, MockLogSink::new());

        let result = control
            .stop_service(
                StopServiceRequest {
                    service: "core".into(),
                    force: false,
                    grace_period: None,
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_stop_error_becomes_message() {
        let mut processes = configured(&["core"]);
        processes.expect_stop_service().returning(|name, _, _, grace| {
            Err(SupervisorError::UngracefulShutdown {
                name: name.to_string(),
                grace_period: grace,
            })
        });
        let control = control_plane(processes, MockLogSink::new());

        let result = control
            .stop_service(
                StopServiceRequest {
                    service: "core".into(),
                    force: false,
                    grace_period: Some(Duration::from_secs(1)),
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert!(result.message.contains("did not exit gracefully"));
    }

    #[tokio::test]
    async fn test_logs_are_tagged_with_registered_name() {
        let mut logs = MockLogSink::new();
        logs.expect_ingest()
            .with(eq(Some("core".to_string())), always())
            .times(1)
            .returning(|_, _| ());
        let control = control_plane(MockProcessManager::new(), logs);
        let id = register(&control, "core").await;

        control.ingest_log(LogEntry::new(id, LogLevel::Info, "hello")).await;
    }

    #[tokio::test]
    async fn test_streaming_calls_rejected_as_unary() {
        let control = control_plane(MockProcessManager::new(), MockLogSink::new());
        let response = control
            .handle_unary(RpcRequest::StreamLogs, &CancellationToken::new())
            .await;
        assert!(matches!(response, RpcResponse::Error { .. }));
    }

    #[tokio::test]
    async fn test_readiness_reported_from_latch() {
        let control = control_plane(MockProcessManager::new(), MockLogSink::new());
        assert!(!control.system_readiness().await.ready);

        control.readiness.check_once().await;
        let readiness = control.system_readiness().await;
        assert!(readiness.ready);
        assert!(readiness.ready_at.is_some());
    }
}
