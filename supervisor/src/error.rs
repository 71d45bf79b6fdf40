//! Supervisor-specific error types

use shared::{ServiceId, SharedError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    #[error("Service {name} is already running")]
    AlreadyRunning { name: String },

    #[error("Failed to spawn service {name}: {message}")]
    SpawnFailed { name: String, message: String },

    #[error("Service {name} did not exit gracefully within {grace_period:?}")]
    UngracefulShutdown { name: String, grace_period: Duration },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Process control error: {message}")]
    ProcessError { message: String },

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("Network communication error: {message}")]
    NetworkError { message: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SupervisorError {
    pub fn config(field: impl Into<String>) -> Self {
        Self::ConfigurationError { field: field.into() }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::ProcessError { message: message.into() }
    }

    pub fn not_found(service_id: &ServiceId) -> Self {
        Self::ServiceNotFound {
            service: service_id.to_string(),
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
