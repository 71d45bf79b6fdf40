//! Multi-instance port isolation
//!
//! Shifts the port carried by internal endpoint flags so several copies of
//! the same service set can share one host. Externally-facing ports
//! (`--external-port`, `--http-port`, `--rest-port` and their environment
//! variables) are operator-declared and never shifted.

use shared::{process_debug, process_warn, ProcessId};

/// Flags whose value names an internal endpoint
pub const INTERNAL_PORT_FLAGS: &[&str] = &[
    "--port",
    "--rpc-port",
    "--grpc-port",
    "--bind",
    "--rpc-bind",
    "--listen",
    "--rpc-listen",
    "--supervisor",
    "--supervisor-addr",
];

/// Process-wide port offset; zero disables rewriting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortOffset(u16);

impl PortOffset {
    pub fn new(offset: u16) -> Self {
        Self(offset)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn is_enabled(&self) -> bool {
        self.0 != 0
    }

    /// `port + offset`, or `None` on overflow
    pub fn shift_port(&self, port: u16) -> Option<u16> {
        port.checked_add(self.0)
    }

    /// Shift a bare port (`50051`) or `host:port` value.
    ///
    /// Returns `None` when the value carries no parseable port.
    pub fn shift_value(&self, value: &str) -> Option<String> {
        if let Ok(port) = value.parse::<u16>() {
            return self.shift_port(port).map(|p| p.to_string());
        }

        let (host, port) = value.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        self.shift_port(port).map(|p| format!("{host}:{p}"))
    }

    /// Rewrite every recognized internal port flag in `args`.
    ///
    /// Handles both `--flag=value` and `--flag value`. Anything that does
    /// not parse is passed through untouched.
    pub fn apply_to_args(&self, args: &[String]) -> Vec<String> {
        if !self.is_enabled() {
            return args.to_vec();
        }

        let mut rewritten = Vec::with_capacity(args.len());
        let mut shift_next = false;

        for arg in args {
            if shift_next {
                shift_next = false;
                rewritten.push(self.shift_or_keep(arg));
                continue;
            }

            if let Some((flag, value)) = arg.split_once('=') {
                if INTERNAL_PORT_FLAGS.contains(&flag) {
                    rewritten.push(format!("{flag}={}", self.shift_or_keep(value)));
                    continue;
                }
            } else if INTERNAL_PORT_FLAGS.contains(&arg.as_str()) {
                shift_next = true;
            }

            rewritten.push(arg.clone());
        }

        rewritten
    }

    fn shift_or_keep(&self, value: &str) -> String {
        match self.shift_value(value) {
            Some(shifted) => shifted,
            None => {
                if value.parse::<u32>().is_ok() || value.rsplit_once(':').is_some() {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Port offset {} could not be applied to '{}', leaving unchanged",
                        self.0,
                        value
                    );
                } else {
                    process_debug!(ProcessId::current(), "No port found in '{}', leaving unchanged", value);
                }
                value.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_equals_form_bare_port() {
        let offset = PortOffset::new(1000);
        assert_eq!(offset.apply_to_args(&args(&["--port=50051"])), args(&["--port=51051"]));
    }

    #[test]
    fn test_equals_form_host_port() {
        let offset = PortOffset::new(1000);
        assert_eq!(
            offset.apply_to_args(&args(&["--supervisor=localhost:50000"])),
            args(&["--supervisor=localhost:51000"])
        );
    }

    #[test]
    fn test_unrelated_flag_untouched() {
        let offset = PortOffset::new(1000);
        assert_eq!(offset.apply_to_args(&args(&["--name=foo"])), args(&["--name=foo"]));
    }

    #[test]
    fn test_separate_value_form() {
        let offset = PortOffset::new(10);
        assert_eq!(
            offset.apply_to_args(&args(&["--listen", "0.0.0.0:7000", "--verbose"])),
            args(&["--listen", "0.0.0.0:7010", "--verbose"])
        );
    }

    #[test]
    fn test_external_ports_never_shifted() {
        let offset = PortOffset::new(1000);
        let input = args(&["--external-port=8443", "--http-port", "8080", "--rest-port=9090"]);
        assert_eq!(offset.apply_to_args(&input), input);
    }

    #[test]
    fn test_unparseable_values_left_alone() {
        let offset = PortOffset::new(1000);
        assert_eq!(
            offset.apply_to_args(&args(&["--port=auto", "--supervisor=localhost:http"])),
            args(&["--port=auto", "--supervisor=localhost:http"])
        );
    }

    #[test]
    fn test_overflow_left_alone() {
        let offset = PortOffset::new(1000);
        assert_eq!(offset.apply_to_args(&args(&["--port=65000"])), args(&["--port=65000"]));
    }

    #[test]
    fn test_ipv6_host_keeps_brackets() {
        let offset = PortOffset::new(5);
        assert_eq!(offset.shift_value("[::1]:9000").as_deref(), Some("[::1]:9005"));
    }

    #[test]
    fn test_zero_offset_is_identity() {
        let offset = PortOffset::default();
        let input = args(&["--port=50051", "--supervisor", "localhost:50000"]);
        assert_eq!(offset.apply_to_args(&input), input);
    }

    #[test]
    fn test_trailing_flag_without_value() {
        let offset = PortOffset::new(1);
        assert_eq!(offset.apply_to_args(&args(&["--port"])), args(&["--port"]));
    }
}
