//! Dialers: turn a destination address into a live connection, or fail
//!
//! Three implementations share the [`Dialer`] contract so the scanner and the
//! banner grabber never know how traffic leaves the host:
//!
//! * [`DirectDialer`] connects straight to the destination.
//! * [`HttpProxyDialer`] connects to an HTTP proxy and hands the socket back.
//! * [`Socks5ProxyDialer`] runs a SOCKS5 handshake through the proxy first.
//!
//! Proxy dialers retry with a fixed delay ([`RetryPolicy`]) and keep a small
//! [`DialerState`] describing the connection they last established.

pub mod direct;
pub mod http;
pub mod socks5;

use crate::error::ScanError;
use crate::network::{BoxedStream, NetworkKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Instant;

pub use direct::DirectDialer;
pub use http::HttpProxyDialer;
pub use socks5::Socks5ProxyDialer;

/// Default bound on a single dial (direct) or a whole retry loop (proxy)
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts a proxy dialer makes
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 3;

/// Default fixed delay between proxy dial attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The dialing capability consumed by the scanner and the banner grabber
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `addr` (`host:port`) over `network`
    async fn dial(&self, network: NetworkKind, addr: &str) -> crate::Result<Connection>;
}

#[async_trait]
impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    async fn dial(&self, network: NetworkKind, addr: &str) -> crate::Result<Connection> {
        (**self).dial(network, addr).await
    }
}

/// Dialer shared across scanner and grabber tasks
pub type SharedDialer = Arc<dyn Dialer>;

/// Fixed-delay retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Pause between consecutive attempts
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_DIAL_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// `attempts` is clamped to at least one
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Retry without pausing between attempts
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }
}

/// Which kind of dialer to build from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    #[default]
    Direct,
    Http,
    Socks5,
}

impl ProxyKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProxyKind::Direct => "direct",
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProxyKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "direct" => Ok(ProxyKind::Direct),
            "http" | "https" => Ok(ProxyKind::Http),
            "socks5" | "socks" | "socks5h" => Ok(ProxyKind::Socks5),
            other => Err(ScanError::Config(format!("Unknown proxy type: {}", other))),
        }
    }
}

/// Settings shared by the proxy-backed dialers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerConfig {
    pub proxy_addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl DialerConfig {
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            username: None,
            password: None,
            timeout: DEFAULT_DIAL_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.set_credentials(username, password);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Empty strings clear the corresponding credential
    pub(crate) fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        let username = username.into();
        let password = password.into();
        self.username = (!username.is_empty()).then_some(username);
        self.password = (!password.is_empty()).then_some(password);
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.proxy_addr.trim().is_empty() {
            return Err(ScanError::EmptyProxyAddress);
        }
        Ok(())
    }
}

/// Build the dialer selected by `kind`
///
/// For [`ProxyKind::Direct`] only `config.timeout` is used.
pub fn build_dialer(kind: ProxyKind, config: DialerConfig) -> crate::Result<SharedDialer> {
    let dialer: SharedDialer = match kind {
        ProxyKind::Direct => Arc::new(DirectDialer::new(config.timeout)),
        ProxyKind::Http => Arc::new(HttpProxyDialer::from_config(config)?),
        ProxyKind::Socks5 => Arc::new(Socks5ProxyDialer::from_config(config)?),
    };
    log::debug!("Using {} dialer", kind);
    Ok(dialer)
}

/// Immutable facts about one established connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Address the caller asked for
    pub peer: String,
    pub network: NetworkKind,
    /// Attempts consumed by the dial that produced this connection
    pub attempts: u32,
    pub established_at: Instant,
}

/// A connected byte stream returned by a [`Dialer`]
pub struct Connection {
    stream: BoxedStream,
    info: Arc<ConnectionInfo>,
}

impl Connection {
    pub fn new(stream: BoxedStream, info: ConnectionInfo) -> Self {
        Self {
            stream,
            info: Arc::new(info),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Shut the stream down; dropping the connection also closes it
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    pub fn into_inner(self) -> BoxedStream {
        self.stream
    }

    fn downgrade(&self) -> Weak<ConnectionInfo> {
        Arc::downgrade(&self.info)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("info", &self.info).finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[derive(Default)]
enum Tracked {
    #[default]
    Empty,
    /// Opened by `reconnect` and held by the dialer
    Owned(Connection),
    /// Returned to a caller by `dial`; only diagnostics are kept
    HandedOff(Weak<ConnectionInfo>),
}

/// Connection state tracked by a proxy dialer
///
/// At most one connection is tracked at a time.
#[derive(Default)]
pub struct DialerState {
    connected: bool,
    tracked: Tracked,
}

impl DialerState {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Metadata of the tracked connection, while it is still alive
    pub fn last_connection(&self) -> Option<Arc<ConnectionInfo>> {
        match &self.tracked {
            Tracked::Empty => None,
            Tracked::Owned(conn) => Some(conn.info.clone()),
            Tracked::HandedOff(weak) => weak.upgrade(),
        }
    }

    fn record_handoff(&mut self, conn: &Connection, connected: bool) {
        self.tracked = Tracked::HandedOff(conn.downgrade());
        self.connected = connected;
    }

    /// Release whatever is tracked; the dialer no longer counts as connected
    fn take_owned(&mut self) -> Option<Connection> {
        self.connected = false;
        match std::mem::take(&mut self.tracked) {
            Tracked::Owned(conn) => Some(conn),
            _ => None,
        }
    }

    fn store_owned(&mut self, conn: Connection, connected: bool) {
        self.tracked = Tracked::Owned(conn);
        self.connected = connected;
    }
}

impl fmt::Debug for DialerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = match &self.tracked {
            Tracked::Empty => "empty",
            Tracked::Owned(_) => "owned",
            Tracked::HandedOff(_) => "handed-off",
        };
        f.debug_struct("DialerState")
            .field("connected", &self.connected)
            .field("tracked", &tracked)
            .finish()
    }
}

/// Lock a dialer's state, recovering it if a previous holder panicked
fn lock_state(state: &Mutex<DialerState>) -> MutexGuard<'_, DialerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Close a connection the dialer owned, ignoring close errors
async fn close_quietly(conn: Option<Connection>) {
    if let Some(conn) = conn {
        let peer = conn.info().peer.clone();
        if let Err(e) = conn.close().await {
            log::debug!("Ignoring close error for {}: {}", peer, e);
        }
    }
}

/// Run `attempt` under `policy`, returning the value and the attempts used
///
/// With a `deadline`, the whole loop is bounded: reaching it before an
/// attempt starts, or while an attempt or a delay is pending, yields
/// [`ScanError::Timeout`].
async fn retry_dial<T, F, Fut>(
    policy: RetryPolicy,
    deadline: Option<Instant>,
    label: &str,
    mut attempt: F,
) -> crate::Result<(T, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let max_attempts = policy.attempts.max(1);
    let mut attempts = 0;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ScanError::Timeout);
        }
        attempts += 1;

        let result = match deadline {
            Some(d) => tokio::time::timeout_at(d, attempt()).await?,
            None => attempt().await,
        };

        let err = match result {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => e,
        };

        log::debug!("{}: attempt {}/{} failed: {}", label, attempts, max_attempts, err);
        if attempts >= max_attempts {
            log::error!("{}: failed to connect after {} attempts", label, max_attempts);
            return Err(ScanError::DialExhausted(max_attempts));
        }

        log::warn!("{}: failed to connect, retrying...", label);
        match deadline {
            Some(d) => tokio::time::timeout_at(d, tokio::time::sleep(policy.delay)).await?,
            None => tokio::time::sleep(policy.delay).await,
        }
    }
}

/// Serialize durations as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
