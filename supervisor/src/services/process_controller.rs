//! Process controller: one OS child process per configured service
//!
//! Each controller owns the runtime handle of a single `ServiceDescriptor`.
//! Start and Stop on the same controller serialize on its lock; controllers
//! for different services never contend. The child itself is owned by a
//! background exit watcher, which is told to kill it over a channel and
//! publishes the exit outcome on a `watch` channel that Stop waits on.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use shared::{process_debug, process_error, process_info, process_warn, ProcessId, ServiceDescriptor};

use super::port_offset::PortOffset;
use super::process_output_handler::{configure_child_stdio, OutputMode};
use super::restart::RestartPolicy;
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::ProcessManager;

/// Bound on waiting for a killed process to be reaped
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Environment variables describing the service's own endpoints
pub const ENV_SERVICE_NAME: &str = "SERVICE_NAME";
pub const ENV_RPC_PORT: &str = "SERVICE_RPC_PORT";
pub const ENV_EXTERNAL_PORT: &str = "SERVICE_EXTERNAL_PORT";
pub const ENV_REST_PORT: &str = "SERVICE_REST_PORT";
pub const ENV_SUPERVISOR_ADDR: &str = "SUPERVISOR_ADDR";
pub const ENV_PORT_OFFSET: &str = "PORT_OFFSET";

/// Settings shared by every controller
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub port_offset: PortOffset,
    /// Supervisor RPC address before the offset is applied; the table
    /// replaces it with the bound address once the listener is up
    pub supervisor_addr: SocketAddr,
    /// Resolved database / keyring / instance-group pass-through variables
    pub passthrough: Vec<(String, String)>,
    pub output: OutputMode,
    pub restart_policy: RestartPolicy,
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self {
            port_offset: PortOffset::default(),
            supervisor_addr: SocketAddr::from(([127, 0, 0, 1], 50000)),
            passthrough: Vec::new(),
            output: OutputMode::Inherit,
            restart_policy: RestartPolicy::Never,
        }
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    pub code: Option<i32>,
}

/// Mutable runtime handle, guarded by the controller's lock
#[derive(Default)]
struct ProcessState {
    pid: Option<u32>,
    exit_rx: Option<watch::Receiver<Option<ExitOutcome>>>,
    kill_tx: Option<mpsc::Sender<()>>,
    /// Bumped on every launch so stale watchers leave newer state alone
    generation: u64,
    restarts: u32,
    stop_requested: bool,
}

impl ProcessState {
    fn is_live(&self) -> bool {
        self.exit_rx
            .as_ref()
            .map(|rx| rx.borrow().is_none())
            .unwrap_or(false)
    }
}

/// Runtime controller for one configured service
pub struct ProcessController {
    descriptor: ServiceDescriptor,
    context: Arc<LaunchContext>,
    supervisor_addr: watch::Receiver<SocketAddr>,
    state: Mutex<ProcessState>,
}

impl ProcessController {
    pub fn new(descriptor: ServiceDescriptor, context: Arc<LaunchContext>) -> Arc<Self> {
        let (_, supervisor_addr) = watch::channel(context.supervisor_addr);
        Self::with_supervisor_addr(descriptor, context, supervisor_addr)
    }

    fn with_supervisor_addr(
        descriptor: ServiceDescriptor,
        context: Arc<LaunchContext>,
        supervisor_addr: watch::Receiver<SocketAddr>,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            context,
            supervisor_addr,
            state: Mutex::new(ProcessState::default()),
        })
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Supervisor address handed to the child, before the offset
    pub fn supervisor_addr(&self) -> SocketAddr {
        *self.supervisor_addr.borrow()
    }

    /// True while a launched child has not yet exited
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_live()
    }

    /// OS pid of the live child, if any
    pub async fn pid(&self) -> Option<u32> {
        let state = self.state.lock().await;
        if state.is_live() { state.pid } else { None }
    }

    /// Number of automatic relaunches since the last explicit start
    pub async fn restart_count(&self) -> u32 {
        self.state.lock().await.restarts
    }

    /// Launch the service; fails if it is already running
    pub async fn start(self: &Arc<Self>) -> SupervisorResult<()> {
        let mut state = self.state.lock().await;
        if state.is_live() {
            return Err(SupervisorError::AlreadyRunning {
                name: self.descriptor.name.clone(),
            });
        }

        state.stop_requested = false;
        state.restarts = 0;
        self.launch(&mut state)
    }

    /// Stop the service.
    ///
    /// Sends a graceful termination signal and waits up to `grace_period`
    /// for the child to exit, then kills it and reports the ungraceful exit.
    /// `force` kills immediately. Succeeds without doing anything when the
    /// service is not running. The lock is released once the child has been
    /// signalled, so status queries do not wait out the grace period.
    pub async fn stop(
        &self,
        cancel: &CancellationToken,
        force: bool,
        grace_period: Duration,
    ) -> SupervisorResult<()> {
        let (mut exit_rx, kill_tx) = {
            let mut state = self.state.lock().await;
            // Set even when idle so a relaunch waiting out its backoff is dropped
            state.stop_requested = true;
            let exit_rx = match state.exit_rx.clone() {
                Some(rx) if state.is_live() => rx,
                _ => return Ok(()),
            };
            let kill_tx = state.kill_tx.clone();
            if force {
                request_kill(&kill_tx);
            } else {
                self.terminate(state.pid, &kill_tx);
            }
            (exit_rx, kill_tx)
        };

        if force {
            return self.await_kill(&mut exit_rx).await;
        }

        tokio::select! {
            _ = wait_for_exit(&mut exit_rx) => {
                process_info!(ProcessId::current(), "🛑 Service {} exited gracefully", self.descriptor.name);
                Ok(())
            }
            _ = tokio::time::sleep(grace_period) => {
                process_warn!(
                    ProcessId::current(),
                    "⏰ Service {} ignored termination for {:?}, killing",
                    self.descriptor.name,
                    grace_period
                );
                request_kill(&kill_tx);
                self.await_kill(&mut exit_rx).await?;
                Err(SupervisorError::UngracefulShutdown {
                    name: self.descriptor.name.clone(),
                    grace_period,
                })
            }
            _ = cancel.cancelled() => {
                Err(SupervisorError::Cancelled {
                    operation: format!("stop {}", self.descriptor.name),
                })
            }
        }
    }

    /// Final argument list: placeholders substituted, then internal ports shifted
    pub fn resolve_args(&self) -> Vec<String> {
        let ports = &self.descriptor.ports;
        let optional = |port: Option<u16>| port.map(|p| p.to_string()).unwrap_or_default();

        let substituted: Vec<String> = self
            .descriptor
            .args
            .iter()
            .map(|arg| {
                arg.replace("{name}", &self.descriptor.name)
                    .replace("{rpc_port}", &ports.rpc_port.to_string())
                    .replace("{external_port}", &optional(ports.external_port))
                    .replace("{rest_port}", &optional(ports.rest_port))
                    .replace("{supervisor_addr}", &self.supervisor_addr().to_string())
            })
            .collect();

        self.context.port_offset.apply_to_args(&substituted)
    }

    /// Variables layered over the inherited environment, later entries win:
    /// descriptor env, pass-through values, then endpoint variables
    pub fn resolve_env(&self) -> Vec<(String, String)> {
        let offset = self.context.port_offset;
        let ports = &self.descriptor.ports;

        let mut env: Vec<(String, String)> = self
            .descriptor
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        env.extend(self.context.passthrough.iter().cloned());

        env.push((ENV_SERVICE_NAME.to_string(), self.descriptor.name.clone()));
        env.push((ENV_PORT_OFFSET.to_string(), offset.value().to_string()));

        if ports.rpc_port != 0 {
            let rpc_port = offset.shift_port(ports.rpc_port).unwrap_or(ports.rpc_port);
            env.push((ENV_RPC_PORT.to_string(), rpc_port.to_string()));
        }
        if let Some(port) = ports.external_port {
            env.push((ENV_EXTERNAL_PORT.to_string(), port.to_string()));
        }
        if let Some(port) = ports.rest_port {
            env.push((ENV_REST_PORT.to_string(), port.to_string()));
        }

        let supervisor_addr = self.supervisor_addr().to_string();
        let supervisor_addr = offset.shift_value(&supervisor_addr).unwrap_or(supervisor_addr);
        env.push((ENV_SUPERVISOR_ADDR.to_string(), supervisor_addr));

        env
    }

    fn launch(self: &Arc<Self>, state: &mut ProcessState) -> SupervisorResult<()> {
        let args = self.resolve_args();

        let mut cmd = Command::new(&self.descriptor.executable);
        cmd.args(&args).envs(self.resolve_env()).kill_on_drop(true);
        configure_child_stdio(&mut cmd, self.context.output, &self.descriptor.name);

        let child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            name: self.descriptor.name.clone(),
            message: e.to_string(),
        })?;

        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);

        state.generation += 1;
        state.pid = pid;
        state.exit_rx = Some(exit_rx);
        state.kill_tx = Some(kill_tx);

        tokio::spawn(Arc::clone(self).watch_exit(child, kill_rx, exit_tx, state.generation));

        process_info!(
            ProcessId::current(),
            "🚀 Started service {} (PID: {}) {:?}",
            self.descriptor.name,
            pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()),
            args
        );
        Ok(())
    }

    async fn watch_exit(
        self: Arc<Self>,
        mut child: Child,
        mut kill_rx: mpsc::Receiver<()>,
        exit_tx: watch::Sender<Option<ExitOutcome>>,
        generation: u64,
    ) {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(()) = kill_rx.recv() => {
                    if let Err(e) = child.start_kill() {
                        process_debug!(ProcessId::current(), "Kill of {} failed: {}", self.descriptor.name, e);
                    }
                }
            }
        };

        let outcome = match status {
            Ok(status) => ExitOutcome {
                success: status.success(),
                code: status.code(),
            },
            Err(e) => {
                process_error!(ProcessId::current(), "❌ Waiting on {} failed: {}", self.descriptor.name, e);
                ExitOutcome { success: false, code: None }
            }
        };

        let _ = exit_tx.send(Some(outcome));
        self.on_exit(generation, outcome).await;
    }

    async fn on_exit(self: &Arc<Self>, generation: u64, outcome: ExitOutcome) {
        let delay = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.pid = None;
            state.kill_tx = None;

            if state.stop_requested {
                process_debug!(ProcessId::current(), "Service {} exited after stop request", self.descriptor.name);
                return;
            }

            process_warn!(
                ProcessId::current(),
                "⚠️ Service {} exited unexpectedly (success: {}, code: {:?})",
                self.descriptor.name,
                outcome.success,
                outcome.code
            );

            match self.context.restart_policy.delay_for(outcome.success, state.restarts) {
                Some(delay) => {
                    state.restarts += 1;
                    delay
                }
                None => return,
            }
        };

        process_info!(
            ProcessId::current(),
            "🔄 Restarting service {} in {:?}",
            self.descriptor.name,
            delay
        );
        tokio::time::sleep(delay).await;

        let mut state = self.state.lock().await;
        if state.generation != generation || state.stop_requested || state.is_live() {
            return;
        }
        if let Err(e) = self.launch(&mut state) {
            process_error!(ProcessId::current(), "❌ Restart of {} failed: {}", self.descriptor.name, e);
        }
    }

    #[cfg(unix)]
    fn terminate(&self, pid: Option<u32>, kill_tx: &Option<mpsc::Sender<()>>) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = pid else {
            return request_kill(kill_tx);
        };

        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                process_debug!(ProcessId::current(), "📤 Sent SIGTERM to {} (PID: {})", self.descriptor.name, pid);
            }
            Err(nix::errno::Errno::ESRCH) => {
                process_debug!(ProcessId::current(), "Process {} already gone", pid);
            }
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ SIGTERM to {} failed: {}, killing", pid, e);
                request_kill(kill_tx);
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, _pid: Option<u32>, kill_tx: &Option<mpsc::Sender<()>>) {
        request_kill(kill_tx);
    }

    async fn await_kill(&self, exit_rx: &mut watch::Receiver<Option<ExitOutcome>>) -> SupervisorResult<()> {
        tokio::time::timeout(KILL_WAIT, wait_for_exit(exit_rx))
            .await
            .map_err(|_| SupervisorError::process(format!("{} did not exit after kill", self.descriptor.name)))
    }
}

/// Ask the exit watcher to kill the child
fn request_kill(kill_tx: &Option<mpsc::Sender<()>>) {
    if let Some(kill_tx) = kill_tx {
        let _ = kill_tx.try_send(());
    }
}

/// Resolves once the watcher has published an exit outcome
async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<ExitOutcome>>) {
    // A dropped sender means the watcher is gone, which only happens after exit
    let _ = exit_rx.wait_for(|outcome| outcome.is_some()).await;
}

/// Controllers for every configured service, keyed by name
pub struct ProcessTable {
    controllers: HashMap<String, Arc<ProcessController>>,
    supervisor_addr: watch::Sender<SocketAddr>,
}

impl ProcessTable {
    pub fn new(descriptors: &[ServiceDescriptor], context: LaunchContext) -> Self {
        let context = Arc::new(context);
        let (supervisor_addr, addr_rx) = watch::channel(context.supervisor_addr);
        let controllers = descriptors
            .iter()
            .map(|d| {
                let controller =
                    ProcessController::with_supervisor_addr(d.clone(), Arc::clone(&context), addr_rx.clone());
                (d.name.clone(), controller)
            })
            .collect();
        Self {
            controllers,
            supervisor_addr,
        }
    }

    /// Point later launches at `addr` (pre-offset form)
    pub fn set_supervisor_addr(&self, addr: SocketAddr) {
        self.supervisor_addr.send_replace(addr);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProcessController>> {
        self.controllers.get(name)
    }

    fn controller(&self, name: &str) -> SupervisorResult<&Arc<ProcessController>> {
        self.get(name).ok_or_else(|| SupervisorError::ServiceNotFound {
            service: name.to_string(),
        })
    }

    /// Stop every running service concurrently; returns the failures
    pub async fn stop_all(&self, grace_period: Duration) -> Vec<(String, SupervisorError)> {
        let cancel = CancellationToken::new();
        let stops = self.controllers.values().map(|controller| {
            let cancel = cancel.clone();
            async move {
                let result = controller.stop(&cancel, false, grace_period).await;
                (controller.name().to_string(), result)
            }
        });

        join_all(stops)
            .await
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| (name, e)))
            .collect()
    }
}

#[async_trait]
impl ProcessManager for ProcessTable {
    async fn start_service(&self, name: &str) -> SupervisorResult<()> {
        self.controller(name)?.start().await
    }

    async fn stop_service(
        &self,
        name: &str,
        cancel: CancellationToken,
        force: bool,
        grace_period: Duration,
    ) -> SupervisorResult<()> {
        self.controller(name)?.stop(&cancel, force, grace_period).await
    }

    async fn is_running(&self, name: &str) -> SupervisorResult<bool> {
        Ok(self.controller(name)?.is_running().await)
    }

    fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.keys().cloned().collect();
        names.sort();
        names
    }
}
