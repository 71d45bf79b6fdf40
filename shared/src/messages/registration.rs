//! Worker → Supervisor registration messages

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{ServiceDescriptor, ServiceId};

/// Sent by a worker once it is up and able to heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub descriptor: ServiceDescriptor,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub service_id: Option<ServiceId>,
    /// Configuration the worker should adopt on start
    pub initial_config: HashMap<String, String>,
}

impl RegisterResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            service_id: None,
            initial_config: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub service_id: ServiceId,
    pub reason: String,
}

/// `{success, message}` result returned by unary calls
///
/// Caller errors travel here instead of tearing down the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
