//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::errors::SharedError;

/// Global logging identity - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Identity of the process emitting log lines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// The supervising control-plane process
    Supervisor,
    /// A managed worker process, by configured name
    Service(String),
}

impl ProcessId {
    /// Initialize the global process ID for the supervisor
    pub fn init_supervisor() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Supervisor)
    }

    /// Initialize the global process ID for a managed service
    pub fn init_service(name: impl Into<String>) -> &'static ProcessId {
        let name = name.into();
        PROCESS_ID.get_or_init(|| ProcessId::Service(name))
    }

    /// Get the global process ID, defaulting to the supervisor
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Supervisor)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Supervisor => write!(f, "supervisor"),
            ProcessId::Service(name) => write!(f, "service_{name}"),
        }
    }
}

/// Opaque identifier handed to a service when it registers.
///
/// Generated from a random UUID, never from the OS process id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Health of a registered service
///
/// `Starting -> Healthy <-> Degraded <-> Unhealthy`, with `Stopped` terminal
/// once the service unregisters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Stopped,
}

impl HealthStatus {
    /// Healthy, or degraded but still serving
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Starting => write!(f, "STARTING"),
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
            HealthStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starting" => Ok(HealthStatus::Starting),
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            "stopped" => Ok(HealthStatus::Stopped),
            _ => Err(SharedError::InvalidHealthStatus { input: s.to_string() }),
        }
    }
}

/// Ports declared by a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePorts {
    /// Internal control RPC port, shifted by the instance port offset
    pub rpc_port: u16,
    /// Externally-facing listen port, never shifted
    #[serde(default)]
    pub external_port: Option<u16>,
    /// REST port, never shifted
    #[serde(default)]
    pub rest_port: Option<u16>,
}

/// Declared identity of a configured service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub executable: PathBuf,
    /// Argument template; `{name}`, `{rpc_port}`, `{external_port}`,
    /// `{rest_port}` and `{supervisor_addr}` are substituted at launch
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: ServicePorts,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            env: HashMap::new(),
            ports: ServicePorts::default(),
            dependencies: Vec::new(),
            required: false,
            enabled: true,
        }
    }

    /// Set the argument template (fluent API)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add a descriptor-specific environment variable (fluent API)
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set declared ports (fluent API)
    pub fn with_ports(mut self, ports: ServicePorts) -> Self {
        self.ports = ports;
        self
    }

    /// Set dependency names (fluent API)
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Mark as required for readiness (fluent API)
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Enable or disable the service (fluent API)
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
