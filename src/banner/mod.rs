//! Banner grabbing
//!
//! Connects through a [`Dialer`](crate::dialer::Dialer) and reads whatever
//! greeting the service sends first. Single-host grabs retry on dial and read
//! failures; a graceful close with no data counts as an empty banner.

use crate::dialer::{RetryPolicy, SharedDialer};
use crate::error::ScanError;
use crate::network::{join_host_port, NetworkKind};
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Default number of hosts grabbed at once
pub const DEFAULT_BANNER_CONCURRENCY: usize = 1000;

/// Default attempts per host
pub const DEFAULT_BANNER_ATTEMPTS: u32 = 3;

/// Default read buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default bound on the first read of each attempt
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A banner captured from one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub addr: String,
    pub bytes: Bytes,
    /// Attempts consumed, the successful one included
    pub attempts: u32,
}

impl Banner {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn text(&self) -> String {
        printable(&self.bytes)
    }
}

/// Outcome of grabbing one host's banner inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerResult {
    pub host: String,
    pub port: u16,
    pub banner: Bytes,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

impl BannerResult {
    pub fn text(&self) -> String {
        printable(&self.banner)
    }
}

/// Lossy UTF-8 with surrounding whitespace and line endings removed
pub fn printable(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Grabs banners with per-host retry and a bounded fan-out
#[derive(Clone)]
pub struct BannerGrabber {
    dialer: SharedDialer,
    network: NetworkKind,
    retry: RetryPolicy,
    read_timeout: Duration,
    concurrency: usize,
}

impl BannerGrabber {
    pub fn new(dialer: SharedDialer) -> Self {
        Self {
            dialer,
            network: NetworkKind::Tcp,
            retry: RetryPolicy::immediate(DEFAULT_BANNER_ATTEMPTS),
            read_timeout: DEFAULT_READ_TIMEOUT,
            concurrency: DEFAULT_BANNER_CONCURRENCY,
        }
    }

    pub fn with_network(mut self, network: NetworkKind) -> Self {
        self.network = network;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound each read; a service that stays silent then counts as a failed attempt
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Clamped to at least one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Read up to `buffer_size` bytes from `host:port`
    pub async fn grab_banner(&self, host: &str, port: u16, buffer_size: usize) -> crate::Result<Banner> {
        if buffer_size == 0 {
            return Err(ScanError::Config("Buffer size must be greater than 0".to_string()));
        }

        let addr = join_host_port(host, port);
        let max_attempts = self.retry.attempts.max(1);

        for attempt in 1..=max_attempts {
            if attempt > 1 && !self.retry.delay.is_zero() {
                sleep(self.retry.delay).await;
            }

            match self.read_once(&addr, buffer_size).await {
                Ok(bytes) => {
                    if bytes.is_empty() {
                        log::info!("Connection to {} closed by server", addr);
                    } else {
                        log::info!("Grabbed banner from {}: {}", addr, printable(&bytes));
                    }
                    return Ok(Banner {
                        addr,
                        bytes,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    log::error!("Attempt {}/{} on {} failed: {}", attempt, max_attempts, addr, e);
                }
            }
        }

        Err(ScanError::BannerGrabExhausted {
            addr,
            attempts: max_attempts,
        })
    }

    /// One dial and one read; the connection is closed when this returns
    async fn read_once(&self, addr: &str, buffer_size: usize) -> crate::Result<Bytes> {
        let mut conn = self.dialer.dial(self.network, addr).await?;
        let mut buffer = vec![0u8; buffer_size];

        let n = match timeout(self.read_timeout, conn.read(&mut buffer)).await? {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(ScanError::ReadFailure(format!("{}: {}", addr, e))),
        };

        buffer.truncate(n);
        Ok(Bytes::from(buffer))
    }

    /// Grab banners from every host concurrently
    ///
    /// Returns one result per host that was dispatched, in host order. Hosts
    /// not yet dispatched or still in flight when `cancel` fires are skipped.
    pub async fn grab_banners(
        &self,
        hosts: &[String],
        port: u16,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Vec<BannerResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(hosts.len());

        for host in hosts {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let grabber = self.clone();
            let host = host.clone();
            let token = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => return None,
                    result = grabber.grab_banner(&host, port, buffer_size) => result,
                };

                Some(match result {
                    Ok(banner) => BannerResult {
                        host,
                        port,
                        banner: banner.bytes,
                        success: true,
                        attempts: banner.attempts,
                        error: None,
                    },
                    Err(e) => {
                        log::error!("Failed to grab banner from {}: {}", host, e);
                        let attempts = match &e {
                            ScanError::BannerGrabExhausted { attempts, .. } => *attempts,
                            _ => 0,
                        };
                        BannerResult {
                            host,
                            port,
                            banner: Bytes::new(),
                            success: false,
                            attempts,
                            error: Some(e.to_string()),
                        }
                    }
                })
            }));
        }

        // Join barrier
        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Banner task failed: {}", e);
                    None
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for BannerGrabber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BannerGrabber")
            .field("network", &self.network)
            .field("retry", &self.retry)
            .field("read_timeout", &self.read_timeout)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
