//! Operator → Supervisor control messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::types::{HealthStatus, ServiceId};

/// Start a configured service
///
/// `service` is either a configured service name or the id of a registered
/// instance of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartServiceRequest {
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopServiceRequest {
    pub service: String,
    pub force: bool,
    /// Falls back to the supervisor's default grace period when absent
    pub grace_period: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListServicesRequest {
    pub state_filter: Option<HealthStatus>,
    /// Substring match against the service name
    pub name_pattern: Option<String>,
}

/// Point-in-time view of a registered service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_id: ServiceId,
    pub name: String,
    pub status: HealthStatus,
    pub capabilities: Vec<String>,
    pub metrics: HashMap<String, f64>,
    pub registered_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_healthy: Option<DateTime<Utc>>,
}

/// Command waiting for delivery on the target's next heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCommand {
    pub command_id: String,
    pub kind: CommandKind,
    pub issued_at: DateTime<Utc>,
}

impl ServiceCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            kind,
            issued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Re-read configuration without restarting
    ReloadConfig,

    /// Stop taking new work and finish in-flight requests
    Drain,

    /// Exit voluntarily within the given grace period
    Shutdown { grace_period_secs: u64 },

    Custom {
        name: String,
        args: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemReadiness {
    pub ready: bool,
    pub ready_at: Option<DateTime<Utc>>,
}
