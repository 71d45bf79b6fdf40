//! Helper to configure child process stdout/stderr
//!
//! Managed services write straight to the supervisor's own streams; tests
//! and quiet deployments can discard child output instead.

use std::process::Stdio;
use shared::{process_debug, ProcessId};

/// Where a child's standard streams go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Inherit the supervisor's stdout/stderr
    #[default]
    Inherit,
    /// Send child output to the null device
    Discard,
}

/// Configure stdio for a child process
pub fn configure_child_stdio(cmd: &mut tokio::process::Command, mode: OutputMode, process_name: &str) {
    match mode {
        OutputMode::Inherit => {
            cmd.stdout(Stdio::inherit())
               .stderr(Stdio::inherit())
               .stdin(Stdio::null());

            process_debug!(
                ProcessId::current(),
                "🔗 {} output will be forwarded to supervisor stdout/stderr",
                process_name
            );
        }
        OutputMode::Discard => {
            cmd.stdout(Stdio::null())
               .stderr(Stdio::null())
               .stdin(Stdio::null());
        }
    }
}
