//! One-time resolution of the node's address
//!
//! The (host, port) pair is resolved exactly once at startup. A failed
//! lookup is not retried: the endpoint is kept in an unresolved state
//! and the link built on it stays offline for the life of the process.

use std::fmt;
use std::net::SocketAddr;

use tracing::warn;

/// The fixed remote endpoint the client connects to.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: String,
    port: u16,
    addr: Option<SocketAddr>,
}

impl Endpoint {
    /// Resolve `host:port`, preferring an IPv4 address when the lookup
    /// returns several. Resolution failure is tolerated and logged; the
    /// returned endpoint is then permanently unresolved.
    pub async fn resolve(host: &str, port: u16) -> Self {
        let addr = match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                addrs
                    .iter()
                    .find(|a| a.is_ipv4())
                    .or_else(|| addrs.first())
                    .copied()
            }
            Err(e) => {
                warn!(host, port, error = %e, "address resolution failed");
                None
            }
        };

        Self {
            host: host.to_string(),
            port,
            addr,
        }
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn is_resolved(&self) -> bool {
        self.addr.is_some()
    }

    #[cfg(test)]
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            addr: Some(addr),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
