//! Service implementations
//!
//! Production implementations of the trait seams: child process control,
//! port isolation, restart policy and log ingestion.

pub mod log_store;
pub mod port_offset;
pub mod process_controller;
pub mod process_output_handler;
pub mod restart;

#[cfg(test)]
mod tests;

pub use log_store::{LogStore, StoredLog};
pub use port_offset::PortOffset;
pub use process_controller::{LaunchContext, ProcessController, ProcessTable};
pub use process_output_handler::OutputMode;
pub use restart::{BackoffPolicy, RestartPolicy};
