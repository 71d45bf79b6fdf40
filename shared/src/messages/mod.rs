//! Message types for the control-plane RPC surface
//!
//! This module organizes all supervisor ↔ worker messages by category:
//! - `registration`: Register / Unregister and generic operation results
//! - `health`: heartbeats, health-change events and watch subscriptions
//! - `control`: operator start/stop, status queries and queued commands
//! - `logs`: client-streamed log ingestion
//! - `rpc`: request/response envelopes carried on the wire

pub mod control;
pub mod health;
pub mod logs;
pub mod registration;
pub mod rpc;

pub use control::{
    CommandKind, ListServicesRequest, ServiceCommand, ServiceStatus, StartServiceRequest,
    StopServiceRequest, SystemReadiness,
};

pub use health::{HealthUpdate, HeartbeatRequest, HeartbeatResponse, WatchRequest};

pub use logs::{LogEntry, LogLevel, LogsAck};

pub use registration::{OperationResult, RegisterRequest, RegisterResponse, UnregisterRequest};

pub use rpc::{RpcRequest, RpcResponse};
