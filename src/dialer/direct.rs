//! Direct dialing, no proxy involved

use super::{Connection, ConnectionInfo, Dialer, DEFAULT_DIAL_TIMEOUT};
use crate::error::ScanError;
use crate::network::{NetworkKind, TokioTransport, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Connects straight to the destination, bounded by a timeout
#[derive(Clone)]
pub struct DirectDialer {
    timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl Default for DirectDialer {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT)
    }
}

impl DirectDialer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            transport: Arc::new(TokioTransport),
        }
    }

    /// Replace the socket layer
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for DirectDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectDialer").field("timeout", &self.timeout).finish()
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: NetworkKind, addr: &str) -> crate::Result<Connection> {
        let stream = match timeout(self.timeout, self.transport.connect(network, addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ScanError::ConnectFailed(format!("{}: {}", addr, e))),
            Err(_) => return Err(ScanError::Timeout),
        };

        Ok(Connection::new(
            stream,
            ConnectionInfo {
                peer: addr.to_string(),
                network,
                attempts: 1,
                established_at: Instant::now(),
            },
        ))
    }
}
