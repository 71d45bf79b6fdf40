//! Test fixtures and data for supervisor tests

use shared::{ServiceDescriptor, ServicePorts};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const SECURITY: &'static str = "security";
    pub const CORE: &'static str = "core";
    pub const DASHBOARD: &'static str = "dashboard";

    /// Required platform services, not launched by the supervisor
    pub fn required_platform() -> Vec<ServiceDescriptor> {
        vec![
            ServiceDescriptor::new(Self::SECURITY, "/opt/platform/security").required(true),
            ServiceDescriptor::new(Self::CORE, "/opt/platform/core")
                .required(true)
                .with_dependencies([Self::SECURITY]),
            ServiceDescriptor::new(Self::DASHBOARD, "/opt/platform/dashboard"),
        ]
    }

    /// A worker registering itself
    pub fn worker(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name, format!("/opt/platform/{name}")).with_ports(ServicePorts {
            rpc_port: 50051,
            external_port: None,
            rest_port: None,
        })
    }

    /// A child that exits on SIGTERM
    pub fn sleeper(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name, "/bin/sh").with_args(["-c", "exec sleep 30"])
    }

    /// A child that ignores SIGTERM
    pub fn stubborn(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name, "/bin/sh").with_args(["-c", "trap '' TERM; exec sleep 60"])
    }

    /// Manifest with two sleepers, one depending on the other, and one disabled
    pub fn sleeper_manifest() -> &'static str {
        r#"{
            "services": [
                {"name": "api", "executable": "/bin/sh", "args": ["-c", "exec sleep 30"],
                 "dependencies": ["store"]},
                {"name": "store", "executable": "/bin/sh", "args": ["-c", "exec sleep 30"],
                 "required": true},
                {"name": "batch", "executable": "/bin/sh", "args": ["-c", "exec sleep 30"],
                 "enabled": false}
            ],
            "passthrough": {"instance_group": "green"}
        }"#
    }
}
