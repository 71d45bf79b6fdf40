//! Common test utilities and infrastructure

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
pub use fixtures::TestFixtures;
pub use helpers::{SupervisorBuilder, TestHelpers};
