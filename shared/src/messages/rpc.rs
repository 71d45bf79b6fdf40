//! Request/response envelopes carried on the control-plane wire
//!
//! Every connection carries exactly one call. Unary calls exchange one
//! request and one response frame. `WatchServiceHealth` answers with a
//! stream of `HealthUpdate` frames until the caller hangs up. `StreamLogs`
//! is followed by `LogEntry` frames until the caller half-closes, then the
//! supervisor answers with `LogsAck`.

use serde::{Deserialize, Serialize};

use super::control::{
    CommandKind, ListServicesRequest, ServiceStatus, StartServiceRequest, StopServiceRequest,
    SystemReadiness,
};
use super::health::{HealthUpdate, HeartbeatRequest, HeartbeatResponse, WatchRequest};
use super::logs::{LogEntry, LogsAck};
use super::registration::{OperationResult, RegisterRequest, RegisterResponse, UnregisterRequest};
use crate::types::ServiceId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    Register(RegisterRequest),
    Unregister(UnregisterRequest),
    StartService(StartServiceRequest),
    StopService(StopServiceRequest),
    GetServiceStatus { service_id: ServiceId },
    ListServices(ListServicesRequest),
    Heartbeat(HeartbeatRequest),
    SendCommand { service_id: ServiceId, command: CommandKind },
    IsSystemReady,
    WatchServiceHealth(WatchRequest),
    StreamLogs,
    LogEntry(LogEntry),
}

impl RpcRequest {
    /// Short call name for logging
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::Register(_) => "RegisterService",
            RpcRequest::Unregister(_) => "UnregisterService",
            RpcRequest::StartService(_) => "StartService",
            RpcRequest::StopService(_) => "StopService",
            RpcRequest::GetServiceStatus { .. } => "GetServiceStatus",
            RpcRequest::ListServices(_) => "ListServices",
            RpcRequest::Heartbeat(_) => "SendHeartbeat",
            RpcRequest::SendCommand { .. } => "SendCommand",
            RpcRequest::IsSystemReady => "IsSystemReady",
            RpcRequest::WatchServiceHealth(_) => "WatchServiceHealth",
            RpcRequest::StreamLogs => "StreamLogs",
            RpcRequest::LogEntry(_) => "LogEntry",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    Registered(RegisterResponse),
    Result(OperationResult),
    Status {
        status: Option<ServiceStatus>,
        message: String,
    },
    Services(Vec<ServiceStatus>),
    Heartbeat(HeartbeatResponse),
    Readiness(SystemReadiness),
    HealthUpdate(HealthUpdate),
    LogsAck(LogsAck),
    /// Malformed or out-of-sequence request
    Error { message: String },
}
