//! Shared types for the service supervisor control plane
//!
//! Contains the identifiers, descriptors and RPC messages exchanged between
//! the supervisor and the worker processes it manages, plus the frame codec
//! both sides speak over TCP.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;
pub mod wire;

pub use errors::*;
pub use types::*;

pub use messages::{
    // Worker ↔ Supervisor registration
    RegisterRequest, RegisterResponse, UnregisterRequest, OperationResult,

    // Heartbeats and health fan-out
    HeartbeatRequest, HeartbeatResponse, HealthUpdate, WatchRequest,

    // Operator control
    StartServiceRequest, StopServiceRequest, ListServicesRequest, ServiceStatus,
    ServiceCommand, CommandKind, SystemReadiness,

    // Log ingestion
    LogEntry, LogLevel, LogsAck,

    // Envelopes
    RpcRequest, RpcResponse,
};
