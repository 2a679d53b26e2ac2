//! SOCKS5 proxy dialer
//!
//! Every attempt opens a fresh socket to the proxy and runs the full SOCKS5
//! handshake (via `tokio-socks`) before yielding a stream to the destination.

use super::{
    close_quietly, lock_state, retry_dial, Connection, ConnectionInfo, Dialer, DialerConfig,
    DialerState, RetryPolicy,
};
use crate::error::ScanError;
use crate::network::{BoxedStream, NetworkKind, TokioTransport, Transport};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_socks::tcp::Socks5Stream;

pub struct Socks5ProxyDialer {
    config: DialerConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<DialerState>,
}

impl Socks5ProxyDialer {
    /// Create a dialer for `proxy_addr`; empty credentials mean no authentication
    pub fn new(proxy_addr: &str, username: &str, password: &str) -> crate::Result<Self> {
        Self::from_config(DialerConfig::new(proxy_addr).with_credentials(username, password))
    }

    pub fn from_config(config: DialerConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport: Arc::new(TokioTransport),
            state: Mutex::new(DialerState::default()),
        })
    }

    /// Replace the socket layer used to reach the proxy
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn set_credentials(&mut self, username: &str, password: &str) {
        self.config.set_credentials(username, password);
    }

    /// Bound for each attempt, handshake included
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.config.retry = retry;
    }

    pub fn proxy_address(&self) -> &str {
        &self.config.proxy_addr
    }

    pub fn username(&self) -> Option<&str> {
        self.config.username.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Set by a successful `dial`; only `reconnect` clears it
    pub fn is_connected(&self) -> bool {
        lock_state(&self.state).is_connected()
    }

    pub fn last_connection(&self) -> Option<Arc<ConnectionInfo>> {
        lock_state(&self.state).last_connection()
    }

    /// Close the owned connection, if any, and dial the proxy's own address again
    pub async fn reconnect(&self) -> crate::Result<()> {
        let previous = lock_state(&self.state).take_owned();
        close_quietly(previous).await;

        let proxy = self.config.proxy_addr.clone();
        let conn = self.connect_via_proxy(NetworkKind::default(), &proxy).await?;
        lock_state(&self.state).store_owned(conn, false);
        log::info!("Reconnected to SOCKS5 proxy {}", proxy);
        Ok(())
    }

    async fn connect_via_proxy(&self, network: NetworkKind, addr: &str) -> crate::Result<Connection> {
        if !network.is_tcp() {
            return Err(ScanError::UnsupportedNetwork(format!(
                "{} is not supported through a SOCKS5 proxy",
                network
            )));
        }

        let label = format!("SOCKS5 proxy {}", self.config.proxy_addr);
        let limit = self.config.timeout;
        let (stream, attempts) = retry_dial(self.config.retry, None, &label, move || async move {
            timeout(limit, self.handshake(addr)).await?
        })
        .await?;

        Ok(Connection::new(
            stream,
            ConnectionInfo {
                peer: addr.to_string(),
                network,
                attempts,
                established_at: Instant::now(),
            },
        ))
    }

    async fn handshake(&self, addr: &str) -> crate::Result<BoxedStream> {
        let proxy = self.config.proxy_addr.as_str();
        let socket = self
            .transport
            .connect(NetworkKind::Tcp, proxy)
            .await
            .map_err(|e| ScanError::ConnectFailed(format!("{}: {}", proxy, e)))?;

        let stream = match (self.config.username.as_deref(), self.config.password.as_deref()) {
            (Some(user), Some(pass)) => {
                Socks5Stream::connect_with_password_and_socket(socket, addr, user, pass).await?
            }
            _ => Socks5Stream::connect_with_socket(socket, addr).await?,
        };
        Ok(Box::new(stream))
    }
}

impl std::fmt::Debug for Socks5ProxyDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5ProxyDialer")
            .field("proxy_addr", &self.config.proxy_addr)
            .field("timeout", &self.config.timeout)
            .field("retry", &self.config.retry)
            .field("state", &*lock_state(&self.state))
            .finish()
    }
}

#[async_trait]
impl Dialer for Socks5ProxyDialer {
    async fn dial(&self, network: NetworkKind, addr: &str) -> crate::Result<Connection> {
        log::debug!("Dialing {} via SOCKS5 proxy {}", addr, self.config.proxy_addr);
        let conn = self.connect_via_proxy(network, addr).await?;
        lock_state(&self.state).record_handoff(&conn, true);
        Ok(conn)
    }
}
