//! HTTP proxy dialer
//!
//! The proxy address is the only destination this dialer ever resolves.
//! Tunnel negotiation is left to whoever consumes the returned stream; this
//! type only owns the connection lifecycle: retry, deadline, state.

use super::{
    close_quietly, lock_state, retry_dial, Connection, ConnectionInfo, Dialer, DialerConfig,
    DialerState, RetryPolicy,
};
use crate::error::ScanError;
use crate::network::{NetworkKind, TokioTransport, Transport};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub struct HttpProxyDialer {
    config: DialerConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<DialerState>,
}

impl HttpProxyDialer {
    /// Create a dialer for `proxy_addr`; empty credentials mean none
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

    /// Replace the socket layer
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn set_credentials(&mut self, username: &str, password: &str) {
        self.config.set_credentials(username, password);
    }

    /// Bound for the whole retry loop of a single `dial`
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

    /// True only while the dialer itself holds a connection opened by `reconnect`
    pub fn is_connected(&self) -> bool {
        lock_state(&self.state).is_connected()
    }

    pub fn last_connection(&self) -> Option<Arc<ConnectionInfo>> {
        lock_state(&self.state).last_connection()
    }

    /// Close the owned connection, if any, and open a fresh one to the proxy
    pub async fn reconnect(&self) -> crate::Result<()> {
        let previous = lock_state(&self.state).take_owned();
        close_quietly(previous).await;

        let conn = self.connect_proxy(NetworkKind::default()).await?;
        lock_state(&self.state).store_owned(conn, true);
        log::info!("Reconnected to HTTP proxy {}", self.config.proxy_addr);
        Ok(())
    }

    async fn connect_proxy(&self, network: NetworkKind) -> crate::Result<Connection> {
        let proxy = self.config.proxy_addr.as_str();
        let deadline = Instant::now() + self.config.timeout;
        let label = format!("HTTP proxy {}", proxy);
        let transport = &self.transport;

        let (stream, attempts) = retry_dial(self.config.retry, Some(deadline), &label, move || async move {
            transport
                .connect(network, proxy)
                .await
                .map_err(|e| ScanError::ConnectFailed(format!("{}: {}", proxy, e)))
        })
        .await?;

        Ok(Connection::new(
            stream,
            ConnectionInfo {
                peer: proxy.to_string(),
                network,
                attempts,
                established_at: Instant::now(),
            },
        ))
    }
}

impl std::fmt::Debug for HttpProxyDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProxyDialer")
            .field("proxy_addr", &self.config.proxy_addr)
            .field("timeout", &self.config.timeout)
            .field("retry", &self.config.retry)
            .field("state", &*lock_state(&self.state))
            .finish()
    }
}

#[async_trait]
impl Dialer for HttpProxyDialer {
    async fn dial(&self, network: NetworkKind, addr: &str) -> crate::Result<Connection> {
        log::debug!("Dialing {} via HTTP proxy {}", addr, self.config.proxy_addr);
        let conn = self.connect_proxy(network).await?;
        // The caller owns the stream from here on
        lock_state(&self.state).record_handoff(&conn, false);
        Ok(conn)
    }
}
