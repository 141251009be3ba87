//! Free-TCP-port discovery for test fixtures.
//!
//! Test servers and subprocess fixtures need port numbers that are known to
//! be unbound at the instant they are handed out. [`free_tcp_ports`] probes
//! random ports in the ephemeral range by actually binding them, holding
//! every probe socket open until the whole set has been collected so that
//! the returned ports are distinct and simultaneously free.
//!
//! The check-then-bind race is accepted: the caller is expected to bind
//! promptly, and the probability of a collision in the ephemeral range is
//! bounded by the retry budget.

use rand::Rng;
use std::net::TcpListener;

/// Lowest port of the IANA ephemeral range.
pub(crate) const EPHEMERAL_MIN: u16 = 49152;
/// Highest port of the IANA ephemeral range.
pub(crate) const EPHEMERAL_MAX: u16 = 65535;

/// Consecutive failed probe binds tolerated before giving up.
const PROBE_RETRY_BUDGET: u32 = 100;

/// Returns `count` distinct TCP port numbers in the ephemeral range, each
/// unbound at the instant of the call.
///
/// Probe sockets stay open until the full set is collected, then all are
/// dropped together; the caller should bind the ports promptly afterward.
/// The failure counter resets whenever a probe succeeds, so the budget
/// bounds *consecutive* misses, not total attempts.
///
/// # Panics
///
/// Panics after 100 consecutive failed binds. A machine
/// with no free ephemeral ports cannot run the tests at all, so this is an
/// unrecoverable setup failure rather than an error the caller could
/// meaningfully handle.
pub fn free_tcp_ports(count: usize) -> Vec<u16> {
    let mut rng = rand::rng();
    let mut retry = 0u32;
    let mut ports = Vec::with_capacity(count);
    // Held open so later probes cannot re-pick an earlier port
    let mut probes = Vec::with_capacity(count);

    while ports.len() != count {
        let port = rng.random_range(EPHEMERAL_MIN..=EPHEMERAL_MAX);
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(probe) => {
                probes.push(probe);
                ports.push(port);
                retry = 0;
            }
            Err(err) => {
                retry += 1;
                tracing::debug!(port, %err, retry, "probe bind failed");
                assert!(
                    retry != PROBE_RETRY_BUDGET,
                    "no free ephemeral TCP ports available"
                );
            }
        }
    }

    drop(probes);
    ports
}

/// Returns a single free ephemeral TCP port.
pub fn free_tcp_port() -> u16 {
    free_tcp_ports(1)[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binding may be denied entirely under a sandbox; tests that need real
    /// sockets bail out instead of failing.
    fn binding_allowed() -> bool {
        match TcpListener::bind("127.0.0.1:0") {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
            Err(e) => panic!("bind: {e}"),
        }
    }

    #[test]
    fn test_ports_are_distinct_and_ephemeral() {
        if !binding_allowed() {
            return;
        }
        let ports = free_tcp_ports(3);
        assert_eq!(ports.len(), 3);
        for &port in &ports {
            assert!(port >= EPHEMERAL_MIN);
        }
        let mut deduped = ports.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), 3);
    }

    #[test]
    fn test_returned_port_is_bindable() {
        if !binding_allowed() {
            return;
        }
        let port = free_tcp_port();
        // Free at the instant of the call: an immediate bind succeeds
        TcpListener::bind(("0.0.0.0", port)).expect("port reported free was not bindable");
    }
}
