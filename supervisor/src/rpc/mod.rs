//! Control-plane RPC surface

pub mod client;
pub mod handler;
pub mod server;

pub use client::{ControlPlaneClient, HealthWatch, LogStream};
pub use handler::ControlPlane;
pub use server::RpcServer;
