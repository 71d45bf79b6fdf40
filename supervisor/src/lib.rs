//! Service supervisor control plane
//!
//! Launches and stops the platform's worker processes, tracks their health
//! from heartbeats, fans out health changes to watchers, and declares the
//! platform ready once every required service is operational. Workers and
//! operators talk to it over a small TCP RPC protocol.

pub mod config;
pub mod core;
pub mod error;
pub mod rpc;
pub mod services;
pub mod shutdown;
pub mod supervisor;
pub mod traits;

// Re-export commonly used types
pub use config::{ServiceManifest, SupervisorConfig};
pub use core::{HealthMonitor, ReadinessManager, ServiceRegistry};
pub use error::{SupervisorError, SupervisorResult};
pub use rpc::{ControlPlane, ControlPlaneClient, RpcServer};
pub use services::{LogStore, PortOffset, ProcessController, ProcessTable, RestartPolicy};
pub use supervisor::Supervisor;
pub use traits::{HealthView, LogSink, ProcessManager};
