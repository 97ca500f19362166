//! TCP reachability check.

use log::debug;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::domain::Probe;

/// Port of the SMB named pipes used by the remote registry service.
pub const DEFAULT_PROBE_PORT: u16 = 445;
/// Time allowed for each connection attempt.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

/// Reachability check that opens a TCP connection to the host.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    /// Port tried on every resolved address.
    port: u16,
    /// Per-address connect timeout.
    timeout: Duration,
}

impl TcpProbe {
    /// Probe connecting to `port` with `timeout` per address.
    #[must_use]
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROBE_PORT,
            Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        )
    }
}

impl Probe for TcpProbe {
    fn is_reachable(&self, host: &str) -> bool {
        let addrs = match (host, self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Could not resolve {host}: {e}");
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return true,
                Err(e) => debug!("Probe of {addr} failed: {e}"),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new(port, Duration::from_millis(500));
        assert!(probe.is_reachable("127.0.0.1"));
    }

    #[test]
    fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TcpProbe::new(port, Duration::from_millis(500));
        assert!(!probe.is_reachable("127.0.0.1"));
    }

    #[test]
    fn unresolvable_host_is_unreachable() {
        let probe = TcpProbe::new(DEFAULT_PROBE_PORT, Duration::from_millis(100));
        assert!(!probe.is_reachable("host name with spaces"));
    }
}
