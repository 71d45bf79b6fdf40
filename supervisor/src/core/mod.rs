//! Core control-plane state
//!
//! In-memory state machines shared by the RPC handlers and the background
//! loops. Nothing here touches sockets or child processes.

pub mod health;
pub mod readiness;
pub mod registry;

pub use health::{HealthMonitor, HealthSnapshot, Subscription, SubscriptionId};
pub use readiness::ReadinessManager;
pub use registry::ServiceRegistry;
