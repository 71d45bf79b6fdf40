//! Client side of the control-plane protocol
//!
//! Used by workers to register and heartbeat, and by operator tooling to
//! start, stop and watch services. Every call opens its own connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use shared::wire::{read_frame, write_frame};
use shared::{
    CommandKind, HealthStatus, HealthUpdate, HeartbeatRequest, HeartbeatResponse, ListServicesRequest,
    LogEntry, LogsAck, OperationResult, RegisterRequest, RegisterResponse, RpcRequest, RpcResponse,
    ServiceDescriptor, ServiceId, ServiceStatus, StartServiceRequest, StopServiceRequest,
    SystemReadiness, UnregisterRequest, WatchRequest,
};

use crate::error::{SupervisorError, SupervisorResult};

#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    addr: SocketAddr,
}

impl ControlPlaneClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn register(
        &self,
        descriptor: ServiceDescriptor,
        capabilities: Vec<String>,
    ) -> SupervisorResult<RegisterResponse> {
        match self
            .call(RpcRequest::Register(RegisterRequest { descriptor, capabilities }))
            .await?
        {
            RpcResponse::Registered(response) => Ok(response),
            other => Err(unexpected("Register", other)),
        }
    }

    pub async fn unregister(&self, service_id: ServiceId, reason: impl Into<String>) -> SupervisorResult<OperationResult> {
        let request = RpcRequest::Unregister(UnregisterRequest {
            service_id,
            reason: reason.into(),
        });
        self.operation("Unregister", request).await
    }

    pub async fn heartbeat(
        &self,
        service_id: ServiceId,
        status: HealthStatus,
        metrics: HashMap<String, f64>,
    ) -> SupervisorResult<HeartbeatResponse> {
        let request = RpcRequest::Heartbeat(HeartbeatRequest {
            service_id,
            status,
            metrics,
        });
        match self.call(request).await? {
            RpcResponse::Heartbeat(response) => Ok(response),
            other => Err(unexpected("Heartbeat", other)),
        }
    }

    /// `service` is a configured name or a registered service id
    pub async fn start_service(&self, service: impl Into<String>) -> SupervisorResult<OperationResult> {
        let request = RpcRequest::StartService(StartServiceRequest { service: service.into() });
        self.operation("StartService", request).await
    }

    pub async fn stop_service(
        &self,
        service: impl Into<String>,
        force: bool,
        grace_period: Option<Duration>,
    ) -> SupervisorResult<OperationResult> {
        let request = RpcRequest::StopService(StopServiceRequest {
            service: service.into(),
            force,
            grace_period,
        });
        self.operation("StopService", request).await
    }

    /// `Ok(None)` when the service is not registered
    pub async fn get_service_status(&self, service_id: ServiceId) -> SupervisorResult<Option<ServiceStatus>> {
        match self.call(RpcRequest::GetServiceStatus { service_id }).await? {
            RpcResponse::Status { status, .. } => Ok(status),
            other => Err(unexpected("GetServiceStatus", other)),
        }
    }

    pub async fn list_services(
        &self,
        state_filter: Option<HealthStatus>,
        name_pattern: Option<String>,
    ) -> SupervisorResult<Vec<ServiceStatus>> {
        let request = RpcRequest::ListServices(ListServicesRequest {
            state_filter,
            name_pattern,
        });
        match self.call(request).await? {
            RpcResponse::Services(services) => Ok(services),
            other => Err(unexpected("ListServices", other)),
        }
    }

    pub async fn send_command(&self, service_id: ServiceId, command: CommandKind) -> SupervisorResult<OperationResult> {
        self.operation("SendCommand", RpcRequest::SendCommand { service_id, command })
            .await
    }

    pub async fn is_system_ready(&self) -> SupervisorResult<SystemReadiness> {
        match self.call(RpcRequest::IsSystemReady).await? {
            RpcResponse::Readiness(readiness) => Ok(readiness),
            other => Err(unexpected("IsSystemReady", other)),
        }
    }

    /// Open a health watch; an empty filter watches every service
    pub async fn watch(&self, service_ids: Vec<ServiceId>) -> SupervisorResult<HealthWatch> {
        let (reader, mut writer) = self.connect().await?;
        write_frame(&mut writer, &RpcRequest::WatchServiceHealth(WatchRequest { service_ids })).await?;
        Ok(HealthWatch { reader, _writer: writer })
    }

    /// Open a client-streaming log upload
    pub async fn stream_logs(&self) -> SupervisorResult<LogStream> {
        let (reader, mut writer) = self.connect().await?;
        write_frame(&mut writer, &RpcRequest::StreamLogs).await?;
        Ok(LogStream { reader, writer, sent: 0 })
    }

    async fn operation(&self, call: &str, request: RpcRequest) -> SupervisorResult<OperationResult> {
        match self.call(request).await? {
            RpcResponse::Result(result) => Ok(result),
            other => Err(unexpected(call, other)),
        }
    }

    async fn call(&self, request: RpcRequest) -> SupervisorResult<RpcResponse> {
        let (mut reader, mut writer) = self.connect().await?;
        write_frame(&mut writer, &request).await?;

        read_frame(&mut reader).await?.ok_or_else(|| {
            SupervisorError::communication(format!("{} closed without a response", request.name()))
        })
    }

    async fn connect(&self) -> SupervisorResult<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| SupervisorError::communication(format!("Connect failed to {}: {}", self.addr, e)))?;
        Ok(stream.into_split())
    }
}

fn unexpected(call: &str, response: RpcResponse) -> SupervisorError {
    match response {
        RpcResponse::Error { message } => SupervisorError::communication(format!("{call} rejected: {message}")),
        other => SupervisorError::communication(format!("{call} got unexpected response: {other:?}")),
    }
}

/// Server-streamed health updates; dropping it ends the watch
pub struct HealthWatch {
    reader: OwnedReadHalf,
    // Held open: closing the write half would read as a hang-up
    _writer: OwnedWriteHalf,
}

impl HealthWatch {
    /// Next update, or `None` once the server closes the stream
    pub async fn next(&mut self) -> SupervisorResult<Option<HealthUpdate>> {
        match read_frame(&mut self.reader).await? {
            Some(RpcResponse::HealthUpdate(update)) => Ok(Some(update)),
            Some(other) => Err(unexpected("WatchServiceHealth", other)),
            None => Ok(None),
        }
    }
}

/// Client-streamed log upload
pub struct LogStream {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    sent: u64,
}

impl LogStream {
    pub async fn send(&mut self, entry: LogEntry) -> SupervisorResult<()> {
        write_frame(&mut self.writer, &RpcRequest::LogEntry(entry)).await?;
        self.sent += 1;
        Ok(())
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Half-close the upload and wait for the server's acknowledgement
    pub async fn finish(mut self) -> SupervisorResult<LogsAck> {
        self.writer.shutdown().await?;
        match read_frame(&mut self.reader).await? {
            Some(RpcResponse::LogsAck(ack)) => Ok(ack),
            Some(other) => Err(unexpected("StreamLogs", other)),
            None => Err(SupervisorError::communication("StreamLogs closed without an acknowledgement")),
        }
    }
}
