//! Persistent session to the Lumen node
//!
//! `DeviceLink` owns the one TCP connection to the node. A background
//! task keeps the session alive: while offline it retries
//! connect-and-handshake on a short fixed delay, while online it
//! periodically probes the socket for silent peer loss. All socket I/O
//! (handshake, exchange, liveness probe) runs under a single mutex so
//! concurrent callers can never interleave bytes on the line-oriented
//! protocol.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use jiff::Zoned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::net::{Delivery, Endpoint, NetError};
use crate::protocol;

/// Bound on the initial TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bound on any single read from the node.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Delay between failed connection attempts. The node is a fixed
/// local-network address expected to reappear quickly, so this is a
/// tight fixed retry, not an exponential backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Interval between liveness probes while the session is up.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_millis(1000);

/// The node's replies are short; one fixed-size read covers them.
const REPLY_BUFFER_SIZE: usize = 500;

/// Bound on the non-destructive liveness peek.
const LIVENESS_PROBE_TIMEOUT: Duration = Duration::from_millis(10);

/// Tunable durations for the link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry_delay: Duration,
    pub liveness_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
        }
    }
}

/// Session state as seen by the background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "offline",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "online",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            2 => LinkState::Connected,
            1 => LinkState::Connecting,
            _ => LinkState::Disconnected,
        }
    }
}

/// Outcome of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeResult {
    /// The line was written; the reply is `None` when nothing arrived
    /// inside the read window.
    Sent(Option<String>),
    /// The write failed; the session has been torn down.
    NotSent,
    /// No session was up; no I/O was attempted.
    NotConnected,
}

/// Edge-triggered connectivity change, delivered to the registered
/// observer on the delivery context.
#[derive(Debug, Clone)]
pub struct ConnectivityEvent {
    pub connected: bool,
    pub at: Zoned,
}

type Observer = Arc<dyn Fn(ConnectivityEvent) + Send + Sync + 'static>;

/// The live socket plus when the handshake completed.
struct Connection {
    stream: TcpStream,
    established_at: Instant,
}

impl Connection {
    /// Write exactly the given bytes; the caller owns the terminator.
    async fn send_raw(&mut self, line: &str) -> std::io::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await
    }

    /// Write a bare word with the line terminator appended.
    async fn send_line(&mut self, word: &str) -> std::io::Result<()> {
        self.stream.write_all(word.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await
    }

    /// One bounded read into a fixed buffer. Returns `None` on
    /// timeout, EOF, or read error; the distinction is the caller's
    /// business (fatal during handshake, tolerated during exchange).
    async fn recv_reply(&mut self, window: Duration) -> Option<String> {
        let mut buffer = [0u8; REPLY_BUFFER_SIZE];
        match timeout(window, self.stream.read(&mut buffer)).await {
            Ok(Ok(0)) => None,
            Ok(Ok(n)) => {
                let text = String::from_utf8_lossy(&buffer[..n]).into_owned();
                debug!(line = %text.trim_end(), "recv");
                Some(text)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "read failed");
                None
            }
            Err(_) => None,
        }
    }

    /// Non-destructive peer check: a bounded one-byte peek. Pending
    /// data or an elapsed window means the peer is still there; EOF or
    /// a socket error means it is gone.
    async fn is_alive(&mut self) -> bool {
        let mut probe = [0u8; 1];
        match timeout(LIVENESS_PROBE_TIMEOUT, self.stream.peek(&mut probe)).await {
            Ok(Ok(0)) => false,
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(_) => true,
        }
    }
}

struct LinkShared {
    endpoint: Endpoint,
    config: LinkConfig,
    /// Single critical section for every socket operation. The
    /// connection is `Some` iff the state is `Connected`.
    io: Mutex<Option<Connection>>,
    state: AtomicU8,
    observer: StdMutex<Option<Observer>>,
    delivery: Delivery,
}

/// Handle to the persistent node session. Cheap to clone; the
/// background task ends once every handle is dropped.
#[derive(Clone)]
pub struct DeviceLink {
    shared: Arc<LinkShared>,
}

impl DeviceLink {
    /// Create the link and spawn its background task. An unresolved
    /// endpoint gets no task at all: the link stays offline for the
    /// life of the process.
    pub fn start(endpoint: Endpoint, config: LinkConfig, delivery: Delivery) -> Self {
        let shared = Arc::new(LinkShared {
            endpoint,
            config,
            io: Mutex::new(None),
            state: AtomicU8::new(LinkState::Disconnected as u8),
            observer: StdMutex::new(None),
            delivery,
        });

        if shared.endpoint.is_resolved() {
            tokio::spawn(reconnect_loop(Arc::downgrade(&shared)));
        } else {
            warn!(endpoint = %shared.endpoint, "endpoint unresolved, link stays offline");
        }

        Self { shared }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Register the connectivity observer. Single slot: a later
    /// registration replaces the earlier one. Events are edge
    /// triggered and run on the delivery context; none fires until the
    /// first real transition, so callers wanting an initial reading
    /// poll [`DeviceLink::is_connected`] once themselves.
    pub fn on_connectivity_change<F>(&self, observer: F)
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.shared.observer.lock() {
            *slot = Some(Arc::new(observer));
        }
    }

    /// One write-then-bounded-read cycle. Callable from any task;
    /// concurrent calls are served one at a time in no guaranteed
    /// order. The line is written as-is: the caller owns the trailing
    /// terminator.
    pub async fn exchange(&self, line: &str) -> ExchangeResult {
        if !self.is_connected() {
            return ExchangeResult::NotConnected;
        }

        let shared = &self.shared;
        let mut io = shared.io.lock().await;
        let Some(conn) = io.as_mut() else {
            return ExchangeResult::NotConnected;
        };

        if let Err(e) = conn.send_raw(line).await {
            warn!(error = %e, "write failed, dropping session");
            *io = None;
            shared.set_state(LinkState::Disconnected);
            return ExchangeResult::NotSent;
        }

        ExchangeResult::Sent(conn.recv_reply(shared.config.read_timeout).await)
    }
}

impl LinkShared {
    fn is_connected(&self) -> bool {
        LinkState::from_u8(self.state.load(Ordering::SeqCst)) == LinkState::Connected
    }

    /// Record the new state and, when the connected flag actually
    /// flips, post one event to the registered observer.
    fn set_state(&self, next: LinkState) {
        let prev = LinkState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        let was_connected = prev == LinkState::Connected;
        let now_connected = next == LinkState::Connected;
        if was_connected == now_connected {
            return;
        }

        let event = ConnectivityEvent {
            connected: now_connected,
            at: Zoned::now(),
        };
        let observer = self.observer.lock().ok().and_then(|slot| slot.clone());
        if let Some(observer) = observer {
            self.delivery.post(move || observer(event));
        }
    }

    /// One connect-and-handshake attempt. On any failure the socket is
    /// discarded and the state forced back to `Disconnected`.
    async fn try_connect(&self) -> bool {
        self.set_state(LinkState::Connecting);
        match self.open_session().await {
            Ok(()) => true,
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "connection attempt failed");
                self.set_state(LinkState::Disconnected);
                false
            }
        }
    }

    /// Open the socket, run the handshake, and store the connection.
    /// The state flips to `Connected` while the I/O lock is still
    /// held, so the connected flag and the stored connection can never
    /// disagree.
    async fn open_session(&self) -> Result<(), NetError> {
        let addr = self
            .endpoint
            .addr()
            .ok_or_else(|| NetError::Resolve(self.endpoint.to_string()))?;

        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(NetError::Connect(e.to_string())),
            Err(_) => {
                return Err(NetError::Connect(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle buffering");
        }

        let mut conn = Connection {
            stream,
            established_at: Instant::now(),
        };

        let mut io = self.io.lock().await;
        self.handshake(&mut conn).await?;
        *io = Some(conn);
        self.set_state(LinkState::Connected);
        info!(%addr, "session established");
        Ok(())
    }

    /// Two-step claim: answer the node's `mode` query with `persist`,
    /// then its `identify` query with `mobile`. An unexpected first
    /// line is logged and tolerated without a reply; an unexpected (or
    /// missing) second line fails the attempt.
    async fn handshake(&self, conn: &mut Connection) -> Result<(), NetError> {
        let window = self.config.read_timeout;

        let greeting = conn.recv_reply(window).await.ok_or_else(|| {
            NetError::Handshake("no mode query before the read window closed".to_string())
        })?;
        if greeting.trim() == protocol::MODE_QUERY {
            conn.send_line(protocol::PERSIST_REPLY).await?;
        } else {
            warn!(line = %greeting.trim(), "unexpected mode query, continuing without claiming persist");
        }

        let challenge = conn.recv_reply(window).await.ok_or_else(|| {
            NetError::Handshake("no identify query before the read window closed".to_string())
        })?;
        if challenge.trim() == protocol::IDENTIFY_QUERY {
            conn.send_line(protocol::MOBILE_REPLY).await?;
            Ok(())
        } else {
            Err(NetError::Handshake(format!(
                "unexpected identify query: {:?}",
                challenge.trim()
            )))
        }
    }

    /// Probe the session for silent peer loss and tear it down when
    /// the peer is gone.
    async fn check_liveness(&self) {
        let mut io = self.io.lock().await;
        let alive = match io.as_mut() {
            Some(conn) => conn.is_alive().await,
            None => return,
        };
        if alive {
            return;
        }

        if let Some(conn) = io.take() {
            debug!(session_age = ?conn.established_at.elapsed(), "peer gone, dropping session");
        }
        self.set_state(LinkState::Disconnected);
    }
}

/// Runs for as long as any `DeviceLink` handle is alive: tight
/// fixed-delay retries while offline, a slow liveness cadence while
/// online.
async fn reconnect_loop(weak: Weak<LinkShared>) {
    loop {
        let Some(shared) = weak.upgrade() else { return };

        if shared.is_connected() {
            let interval = shared.config.liveness_interval;
            drop(shared);
            tokio::time::sleep(interval).await;

            let Some(shared) = weak.upgrade() else { return };
            shared.check_liveness().await;
        } else if shared.try_connect().await {
            // next turn starts the liveness cadence
        } else {
            let delay = shared.config.retry_delay;
            drop(shared);
            tokio::time::sleep(delay).await;
        }
    }
}
