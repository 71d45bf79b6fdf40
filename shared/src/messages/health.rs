//! Heartbeat and health-change messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::control::ServiceCommand;
use crate::types::{HealthStatus, ServiceId};

/// Periodic liveness and health report from a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub service_id: ServiceId,
    pub status: HealthStatus,
    pub metrics: HashMap<String, f64>,
}

/// Commands queued for the worker ride back on the heartbeat reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    pub message: String,
    pub commands: Vec<ServiceCommand>,
}

/// Emitted only when a service's status actually changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub service_id: ServiceId,
    pub old_status: HealthStatus,
    pub new_status: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

/// Subscription filter; an empty list means every service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchRequest {
    pub service_ids: Vec<ServiceId>,
}
