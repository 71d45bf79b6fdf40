//! Main entry point for the supervisor binary

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use shared::{logging, process_debug, process_info, ProcessId};
use supervisor::config::{
    parse_port_offset, HealthConfig, ReadinessConfig, ServiceManifest, SupervisorConfig, DEFAULT_LISTEN_ADDR,
    ENV_PORT_OFFSET,
};
use supervisor::Supervisor;

/// Supervisor for the platform's long-running services
#[derive(Parser)]
#[command(name = "supervisor")]
#[command(about = "Launches platform services, tracks their health and serves the control-plane RPC surface")]
pub struct Args {
    /// Control-plane listen address (the port offset is added to its port)
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    /// JSON service manifest
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Instance port offset; falls back to $PORT_OFFSET, 0 disables isolation
    #[arg(long)]
    pub port_offset: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Heartbeat silence tolerated before a service is marked unhealthy
    #[arg(long, default_value_t = 30)]
    pub heartbeat_timeout_secs: u64,

    /// Interval between health sweeps
    #[arg(long, default_value_t = 10)]
    pub sweep_interval_secs: u64,

    /// Interval between readiness checks
    #[arg(long, default_value_t = 2)]
    pub readiness_interval_secs: u64,

    /// Grace period given to each service on stop
    #[arg(long, default_value_t = 30)]
    pub stop_grace_secs: u64,

    /// Do not launch services at boot
    #[arg(long)]
    pub no_autostart: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<SupervisorConfig> {
        let port_offset = match self.port_offset {
            Some(offset) => offset,
            None => parse_port_offset(std::env::var(ENV_PORT_OFFSET).ok().as_deref())?,
        };

        let mut config = SupervisorConfig {
            listen_addr: self.listen_addr,
            port_offset,
            health: HealthConfig {
                sweep_interval: Duration::from_secs(self.sweep_interval_secs),
                heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
                ..HealthConfig::default()
            },
            readiness: ReadinessConfig {
                poll_interval: Duration::from_secs(self.readiness_interval_secs),
                ..ReadinessConfig::default()
            },
            stop_grace_period: Duration::from_secs(self.stop_grace_secs),
            autostart: !self.no_autostart,
            ..SupervisorConfig::default()
        };

        if let Some(path) = &self.manifest {
            let manifest = ServiceManifest::load(path)
                .with_context(|| format!("loading manifest {}", path.display()))?;
            config = config.with_manifest(manifest);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    ProcessId::init_supervisor();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "service supervisor");

    let config = args.into_config()?;
    process_debug!(
        ProcessId::current(),
        "Listen {} (offset {}), {} service(s), autostart {}",
        config.listen_addr,
        config.port_offset,
        config.services.len(),
        config.autostart
    );

    let supervisor = Supervisor::new(config).context("invalid supervisor configuration")?;
    supervisor
        .readiness()
        .on_ready(|| async {
            process_info!(ProcessId::current(), "🟢 Platform ready, accepting external traffic");
        })
        .await;

    supervisor.run().await.context("supervisor failed")?;
    Ok(())
}
