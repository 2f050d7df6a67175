//! Network layer for the Lumen node link
//!
//! This module owns everything that touches the TCP session:
//! - `endpoint`: one-time address resolution
//! - `link`: the persistent connection manager (handshake, reconnect
//!   loop, liveness, request/response exchange)
//! - `dispatcher`: fire-and-forget command dispatch with a continuation
//! - `delivery`: the single task all continuations and connectivity
//!   events are delivered on

use thiserror::Error;

mod delivery;
mod dispatcher;
mod endpoint;
mod link;

pub use delivery::Delivery;
pub use dispatcher::CommandDispatcher;
pub use endpoint::Endpoint;
pub use link::{ConnectivityEvent, DeviceLink, ExchangeResult, LinkConfig, LinkState};

/// Address the node exposes on its own access-point network.
pub const DEFAULT_HOST: &str = "192.168.3.1";

/// The node listens on the telnet port.
pub const DEFAULT_PORT: u16 = 23;

/// Network error types
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Address resolution error: {0}")]
    Resolve(String),
    #[error("Connect error: {0}")]
    Connect(String),
    #[error("Handshake error: {0}")]
    Handshake(String),
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
}
