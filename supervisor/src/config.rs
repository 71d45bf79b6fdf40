//! Supervisor configuration
//!
//! Timing knobs for the background loops, the service manifest, and the
//! pass-through values every child process receives.

use serde::Deserialize;
use shared::ServiceDescriptor;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{SupervisorError, SupervisorResult};
use crate::services::process_output_handler::OutputMode;
use crate::services::restart::{BackoffPolicy, RestartPolicy};

/// Default RPC listen address (before port offset)
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:50000";

/// Default time a stopping service gets to exit on its own
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Health monitor timing
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub sweep_interval: Duration,
    /// Heartbeat silence tolerated before a service is marked unhealthy
    pub heartbeat_timeout: Duration,
    /// Buffered updates per watch subscriber before drops begin
    pub subscriber_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            subscriber_capacity: 100,
        }
    }
}

impl HealthConfig {
    /// Timeout must outlast the sweep interval so a single late heartbeat
    /// never flips a service to unhealthy
    pub fn validate(&self) -> SupervisorResult<()> {
        if self.heartbeat_timeout <= self.sweep_interval {
            return Err(SupervisorError::config(format!(
                "heartbeat timeout ({:?}) must be greater than sweep interval ({:?})",
                self.heartbeat_timeout, self.sweep_interval
            )));
        }
        if self.subscriber_capacity == 0 {
            return Err(SupervisorError::config("subscriber capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Readiness manager timing
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    /// Minimum gap between "not ready yet" diagnostic lines
    pub log_throttle: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            log_throttle: Duration::from_secs(20),
        }
    }
}

/// Environment variable names for the pass-through values
pub const ENV_DB_NAME: &str = "DB_NAME";
pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_KEYRING_BACKEND: &str = "KEYRING_BACKEND";
pub const ENV_KEYRING_PATH: &str = "KEYRING_PATH";
pub const ENV_INSTANCE_GROUP: &str = "INSTANCE_GROUP_ID";
pub const ENV_PORT_OFFSET: &str = "PORT_OFFSET";

/// Values forwarded unchanged into every child environment
///
/// A value set here wins; otherwise the supervisor's own environment is
/// consulted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PassthroughConfig {
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub db_user: Option<String>,
    #[serde(default)]
    pub keyring_backend: Option<String>,
    #[serde(default)]
    pub keyring_path: Option<String>,
    #[serde(default)]
    pub instance_group: Option<String>,
}

impl PassthroughConfig {
    /// Resolve against the process environment
    pub fn resolve(&self) -> Vec<(String, String)> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve with an explicit fallback lookup
    pub fn resolve_with<F>(&self, lookup: F) -> Vec<(String, String)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pairs = [
            (ENV_DB_NAME, &self.db_name),
            (ENV_DB_USER, &self.db_user),
            (ENV_KEYRING_BACKEND, &self.keyring_backend),
            (ENV_KEYRING_PATH, &self.keyring_path),
            (ENV_INSTANCE_GROUP, &self.instance_group),
        ];

        pairs
            .into_iter()
            .filter_map(|(key, configured)| {
                configured
                    .clone()
                    .or_else(|| lookup(key))
                    .map(|value| (key.to_string(), value))
            })
            .collect()
    }
}

/// Restart settings as written in the manifest
#[derive(Debug, Clone, Deserialize)]
pub struct RestartSettings {
    pub max_restarts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl From<RestartSettings> for RestartPolicy {
    fn from(settings: RestartSettings) -> Self {
        RestartPolicy::OnFailure {
            max_restarts: settings.max_restarts,
            backoff: BackoffPolicy {
                first: Duration::from_millis(settings.initial_backoff_ms),
                max: Duration::from_millis(settings.max_backoff_ms),
                factor: settings.factor,
            },
        }
    }
}

/// JSON service manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceManifest {
    pub services: Vec<ServiceDescriptor>,
    #[serde(default)]
    pub passthrough: PassthroughConfig,
    #[serde(default)]
    pub restart: Option<RestartSettings>,
}

impl ServiceManifest {
    pub fn load(path: &Path) -> SupervisorResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> SupervisorResult<Self> {
        let manifest: ServiceManifest = serde_json::from_str(raw)?;
        start_order(&manifest.services)?;
        Ok(manifest)
    }
}

/// Order services so every dependency starts before its dependents.
///
/// Rejects duplicate names, unknown dependencies and dependency cycles.
pub fn start_order(services: &[ServiceDescriptor]) -> SupervisorResult<Vec<&ServiceDescriptor>> {
    let mut by_name: HashMap<&str, &ServiceDescriptor> = HashMap::new();
    for service in services {
        if by_name.insert(service.name.as_str(), service).is_some() {
            return Err(SupervisorError::config(format!("duplicate service name '{}'", service.name)));
        }
    }

    for service in services {
        for dep in &service.dependencies {
            if !by_name.contains_key(dep.as_str()) {
                return Err(SupervisorError::config(format!(
                    "service '{}' depends on unknown service '{}'",
                    service.name, dep
                )));
            }
        }
    }

    let mut ordered = Vec::with_capacity(services.len());
    let mut done: HashSet<&str> = HashSet::new();
    let mut visiting: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        service: &'a ServiceDescriptor,
        by_name: &HashMap<&str, &'a ServiceDescriptor>,
        done: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
        ordered: &mut Vec<&'a ServiceDescriptor>,
    ) -> SupervisorResult<()> {
        let name = service.name.as_str();
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name) {
            return Err(SupervisorError::config(format!("dependency cycle through service '{name}'")));
        }
        for dep in &service.dependencies {
            if let Some(dep_service) = by_name.get(dep.as_str()) {
                visit(dep_service, by_name, done, visiting, ordered)?;
            }
        }
        visiting.remove(name);
        done.insert(name);
        ordered.push(service);
        Ok(())
    }

    for service in services {
        visit(service, &by_name, &mut done, &mut visiting, &mut ordered)?;
    }

    Ok(ordered)
}

/// Fully resolved supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Listen address before the port offset is applied
    pub listen_addr: SocketAddr,
    /// Instance port offset; 0 disables isolation
    pub port_offset: u16,
    pub services: Vec<ServiceDescriptor>,
    pub passthrough: PassthroughConfig,
    pub restart_policy: RestartPolicy,
    pub health: HealthConfig,
    pub readiness: ReadinessConfig,
    pub stop_grace_period: Duration,
    /// Launch enabled services at boot
    pub autostart: bool,
    /// Entries kept by the in-memory log store
    pub log_capacity: usize,
    pub child_output: OutputMode,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50000)),
            port_offset: 0,
            services: Vec::new(),
            passthrough: PassthroughConfig::default(),
            restart_policy: RestartPolicy::Never,
            health: HealthConfig::default(),
            readiness: ReadinessConfig::default(),
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            autostart: true,
            log_capacity: 10_000,
            child_output: OutputMode::Inherit,
        }
    }
}

impl SupervisorConfig {
    /// Adopt services, pass-through values and restart policy from a manifest
    pub fn with_manifest(mut self, manifest: ServiceManifest) -> Self {
        self.services = manifest.services;
        self.passthrough = manifest.passthrough;
        if let Some(restart) = manifest.restart {
            self.restart_policy = restart.into();
        }
        self
    }

    /// Address the RPC server binds, with the instance offset applied
    pub fn effective_listen_addr(&self) -> SupervisorResult<SocketAddr> {
        let port = self.listen_addr.port().checked_add(self.port_offset).ok_or_else(|| {
            SupervisorError::config(format!(
                "listen port {} + offset {} overflows",
                self.listen_addr.port(),
                self.port_offset
            ))
        })?;
        Ok(SocketAddr::new(self.listen_addr.ip(), port))
    }

    pub fn validate(&self) -> SupervisorResult<()> {
        self.health.validate()?;
        self.effective_listen_addr()?;
        start_order(&self.services)?;
        Ok(())
    }
}

/// Parse `PORT_OFFSET` style values; absent or empty means no offset
pub fn parse_port_offset(raw: Option<&str>) -> SupervisorResult<u16> {
    match raw.map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse::<u16>()
            .map_err(|e| SupervisorError::config(format!("invalid port offset '{value}': {e}"))),
    }
}
