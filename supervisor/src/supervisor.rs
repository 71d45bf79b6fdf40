//! Top-level supervisor
//!
//! Builds one instance of every component, shares them through `Arc`, and
//! owns the background tasks: the RPC listener, the health sweep and the
//! readiness poll. All of them stop when the supervisor's token is cancelled.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shared::{logging, process_error, process_info, process_warn, ProcessId};

use crate::config::{start_order, HealthConfig, SupervisorConfig, ENV_INSTANCE_GROUP};
use crate::core::{HealthMonitor, ReadinessManager, ServiceRegistry};
use crate::error::{SupervisorError, SupervisorResult};
use crate::rpc::{ControlPlane, RpcServer};
use crate::services::{LaunchContext, LogStore, PortOffset, ProcessTable};
use crate::shutdown::wait_for_shutdown_signal;
use crate::traits::{HealthView, LogSink, ProcessManager};

/// Keys of the configuration handed to services on registration
pub const CONFIG_INSTANCE_GROUP: &str = "instance_group";
pub const CONFIG_PORT_OFFSET: &str = "port_offset";
pub const CONFIG_SUPERVISOR_ADDR: &str = "supervisor_addr";
pub const CONFIG_HEARTBEAT_TIMEOUT: &str = "heartbeat_timeout_secs";

pub struct Supervisor {
    config: SupervisorConfig,
    health: Arc<HealthMonitor>,
    registry: Arc<ServiceRegistry>,
    readiness: Arc<ReadinessManager>,
    processes: Arc<ProcessTable>,
    logs: Arc<LogStore>,
    control: Arc<ControlPlane>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> SupervisorResult<Self> {
        config.validate()?;

        let listen_addr = config.effective_listen_addr()?;
        let port_offset = PortOffset::new(config.port_offset);
        let passthrough = config.passthrough.resolve();
        let initial_config = initial_config(&passthrough, port_offset, listen_addr, &config.health);

        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let registry = Arc::new(ServiceRegistry::new(Arc::clone(&health), initial_config));
        let view: Arc<dyn HealthView> = registry.clone();
        let readiness = Arc::new(ReadinessManager::new(&config.services, view, config.readiness.clone()));
        let processes = Arc::new(ProcessTable::new(
            &config.services,
            LaunchContext {
                port_offset,
                supervisor_addr: config.listen_addr,
                passthrough,
                output: config.child_output,
                restart_policy: config.restart_policy,
            },
        ));
        let logs = Arc::new(LogStore::new(config.log_capacity));
        let manager: Arc<dyn ProcessManager> = processes.clone();
        let sink: Arc<dyn LogSink> = logs.clone();
        let control = Arc::new(ControlPlane::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            manager,
            Arc::clone(&readiness),
            sink,
            config.stop_grace_period,
        ));

        Ok(Self {
            config,
            health,
            registry,
            readiness,
            processes,
            logs,
            control,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            local_addr: None,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn readiness(&self) -> &Arc<ReadinessManager> {
        &self.readiness
    }

    pub fn processes(&self) -> &Arc<ProcessTable> {
        &self.processes
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    /// Address the RPC server is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the RPC listener, spawn the background loops and, unless
    /// disabled, launch enabled services in dependency order
    pub async fn start(&mut self) -> SupervisorResult<SocketAddr> {
        if let Some(addr) = self.local_addr {
            return Err(SupervisorError::config(format!("supervisor already started on {addr}")));
        }

        let server = RpcServer::bind(self.config.effective_listen_addr()?, Arc::clone(&self.control)).await?;
        let addr = server.local_addr()?;
        self.local_addr = Some(addr);
        // The bound address differs from the configured one for port 0
        self.registry
            .set_initial_config(CONFIG_SUPERVISOR_ADDR, addr.to_string())
            .await;
        // Children receive the pre-offset form and shift it themselves
        self.processes.set_supervisor_addr(launch_base_addr(addr, self.config.port_offset));
        self.tasks.push(tokio::spawn(server.serve(self.cancel.child_token())));

        let health = Arc::clone(&self.health);
        let token = self.cancel.child_token();
        self.tasks.push(tokio::spawn(async move { health.run_sweeper(token).await }));

        let readiness = Arc::clone(&self.readiness);
        let token = self.cancel.child_token();
        self.tasks.push(tokio::spawn(async move { readiness.run(token).await }));

        if self.config.autostart {
            self.autostart().await?;
        }

        process_info!(
            ProcessId::current(),
            "🎛️ Supervisor up on {} ({} configured service(s), port offset {})",
            addr,
            self.config.services.len(),
            self.config.port_offset
        );
        Ok(addr)
    }

    /// Start every enabled service, dependencies first. A service that fails
    /// to launch is logged and skipped.
    pub async fn autostart(&self) -> SupervisorResult<()> {
        for descriptor in start_order(&self.config.services)? {
            if !descriptor.enabled {
                process_info!(ProcessId::current(), "⏭️ Skipping disabled service {}", descriptor.name);
                continue;
            }
            if let Err(e) = self.processes.start_service(&descriptor.name).await {
                process_error!(ProcessId::current(), "❌ Autostart of {} failed: {}", descriptor.name, e);
            }
        }
        Ok(())
    }

    /// Cancel the background loops, stop every running service within the
    /// configured grace period, and wait for the tasks to finish.
    ///
    /// Returns the services that failed to stop cleanly.
    pub async fn shutdown(&mut self) -> Vec<(String, SupervisorError)> {
        self.cancel.cancel();

        let failures = self.processes.stop_all(self.config.stop_grace_period).await;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                process_warn!(ProcessId::current(), "⚠️ Background task ended abnormally: {}", e);
            }
        }
        failures
    }

    /// Start, serve until a termination signal arrives, then shut down
    pub async fn run(mut self) -> SupervisorResult<()> {
        self.start().await?;

        let signal = wait_for_shutdown_signal().await?;
        logging::log_shutdown(ProcessId::current(), &format!("received {signal}"));

        let failures = self.shutdown().await;
        if failures.is_empty() {
            logging::log_success(ProcessId::current(), "Supervisor stopped gracefully");
        }
        for (name, error) in &failures {
            logging::log_error(ProcessId::current(), &format!("Stopping {name}"), error);
        }
        Ok(())
    }
}

/// Bound address with the instance offset taken back out
fn launch_base_addr(bound: SocketAddr, port_offset: u16) -> SocketAddr {
    let port = bound.port().checked_sub(port_offset).unwrap_or(bound.port());
    SocketAddr::new(bound.ip(), port)
}

fn initial_config(
    passthrough: &[(String, String)],
    port_offset: PortOffset,
    listen_addr: SocketAddr,
    health: &HealthConfig,
) -> HashMap<String, String> {
    let mut config = HashMap::from([
        (CONFIG_PORT_OFFSET.to_string(), port_offset.value().to_string()),
        (CONFIG_SUPERVISOR_ADDR.to_string(), listen_addr.to_string()),
        (
            CONFIG_HEARTBEAT_TIMEOUT.to_string(),
            health.heartbeat_timeout.as_secs().to_string(),
        ),
    ]);

    if let Some((_, group)) = passthrough.iter().find(|(key, _)| key == ENV_INSTANCE_GROUP) {
        config.insert(CONFIG_INSTANCE_GROUP.to_string(), group.clone());
    }
    config
}
