//! Instrumented dialers and transports shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use relayscan::dialer::{Connection, ConnectionInfo, Dialer};
use relayscan::network::{BoxedStream, NetworkKind, Transport};
use relayscan::ScanError;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{sleep, Instant};

/// Transport whose every connect is refused; records when each attempt happened
#[derive(Default)]
pub struct RefusingTransport {
    pub attempts: Mutex<Vec<Instant>>,
}

impl RefusingTransport {
    pub fn calls(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn gaps(&self) -> Vec<Duration> {
        let attempts = self.attempts.lock().unwrap();
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl Transport for RefusingTransport {
    async fn connect(&self, _kind: NetworkKind, _addr: &str) -> io::Result<BoxedStream> {
        self.attempts.lock().unwrap().push(Instant::now());
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
    }
}

/// Transport that builds a fresh stream per connect from a factory
pub struct FactoryTransport<F> {
    factory: F,
    pub connects: AtomicUsize,
}

impl<F> FactoryTransport<F>
where
    F: Fn() -> BoxedStream + Send + Sync,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<F> Transport for FactoryTransport<F>
where
    F: Fn() -> BoxedStream + Send + Sync,
{
    async fn connect(&self, _kind: NetworkKind, _addr: &str) -> io::Result<BoxedStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok((self.factory)())
    }
}

/// Transport that forwards to `inner` until `go_down` is called, then refuses
pub struct OutageTransport {
    inner: Arc<dyn Transport>,
    down: AtomicBool,
}

impl OutageTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for OutageTransport {
    async fn connect(&self, kind: NetworkKind, addr: &str) -> io::Result<BoxedStream> {
        if self.down.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "proxy is down"));
        }
        self.inner.connect(kind, addr).await
    }
}

/// In-memory SOCKS5 proxy: accepts no-auth, records the requested
/// destination, then sends `banner` down the tunnel and closes it
pub struct FakeSocksTransport {
    pub banner: &'static [u8],
    pub requested: Arc<Mutex<Vec<String>>>,
}

impl FakeSocksTransport {
    pub fn new(banner: &'static [u8]) -> Self {
        Self {
            banner,
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Transport for FakeSocksTransport {
    async fn connect(&self, _kind: NetworkKind, _addr: &str) -> io::Result<BoxedStream> {
        let (client, server) = tokio::io::duplex(1024);
        let requested = self.requested.clone();
        let banner = self.banner;
        tokio::spawn(async move {
            if let Ok(target) = serve_socks5(server, banner).await {
                requested.lock().unwrap().push(target);
            }
        });
        Ok(Box::new(client))
    }
}

async fn serve_socks5(mut server: DuplexStream, banner: &[u8]) -> io::Result<String> {
    // Greeting: VER NMETHODS METHODS...
    let mut header = [0u8; 2];
    server.read_exact(&mut header).await?;
    assert_eq!(header[0], 5, "client must speak SOCKS5");
    let mut methods = vec![0u8; header[1] as usize];
    server.read_exact(&mut methods).await?;
    assert!(methods.contains(&0), "client must offer no-auth");
    server.write_all(&[5, 0]).await?;

    // Request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    server.read_exact(&mut request).await?;
    assert_eq!(request[1], 1, "only CONNECT is expected");
    let host = match request[3] {
        1 => {
            let mut ip = [0u8; 4];
            server.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        3 => {
            let len = server.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            server.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        4 => {
            let mut ip = [0u8; 16];
            server.read_exact(&mut ip).await?;
            std::net::Ipv6Addr::from(ip).to_string()
        }
        other => panic!("unexpected address type {}", other),
    };
    let port = server.read_u16().await?;

    server.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
    server.write_all(banner).await?;
    server.shutdown().await?;
    Ok(format!("{}:{}", host, port))
}

/// Mock dialer tracking concurrent dials
///
/// A dial to a port in `open` succeeds after `hold` and serves `greeting`;
/// anything else, or any host in `failing_hosts`, is refused after `hold`.
pub struct InstrumentedDialer {
    pub open: HashSet<u16>,
    pub failing_hosts: HashSet<String>,
    pub greeting: &'static [u8],
    pub hold: Duration,
    pub dials: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InstrumentedDialer {
    pub fn new(open: impl IntoIterator<Item = u16>, hold: Duration) -> Self {
        Self {
            open: open.into_iter().collect(),
            failing_hosts: HashSet::new(),
            greeting: b"",
            hold,
            dials: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_greeting(mut self, greeting: &'static [u8]) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn with_failing_host(mut self, host: &str) -> Self {
        self.failing_hosts.insert(host.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for InstrumentedDialer {
    async fn dial(&self, network: NetworkKind, addr: &str) -> relayscan::Result<Connection> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (host, port) = addr
            .rsplit_once(':')
            .map(|(h, p)| (h.to_string(), p.parse::<u16>().unwrap_or(0)))
            .unwrap_or_default();

        if !self.open.contains(&port) || self.failing_hosts.contains(&host) {
            return Err(ScanError::ConnectFailed(format!("{}: connection refused", addr)));
        }

        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(self.greeting).await?;
        drop(server);
        Ok(Connection::new(
            Box::new(client),
            ConnectionInfo {
                peer: addr.to_string(),
                network,
                attempts: 1,
                established_at: Instant::now(),
            },
        ))
    }
}
