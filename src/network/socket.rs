//! Socket management beneath the dialers
//!
//! [`Transport`] is the raw "open one socket" capability. The proxy dialers
//! layer retry, deadlines and proxy handshakes on top of it, so tests can swap
//! in a transport that counts attempts or fails on demand.

use super::NetworkKind;
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{lookup_host, TcpStream, UdpSocket};

/// Any async byte stream a dialer can hand out
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Type-erased byte stream
pub type BoxedStream = Box<dyn Stream>;

/// Opens a single socket to an address
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, kind: NetworkKind, addr: &str) -> io::Result<BoxedStream>;
}

/// Transport backed by tokio sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTransport;

#[async_trait]
impl Transport for TokioTransport {
    async fn connect(&self, kind: NetworkKind, addr: &str) -> io::Result<BoxedStream> {
        match kind {
            NetworkKind::Tcp => {
                let stream = TcpStream::connect(addr).await?;
                // Banners are small; don't let Nagle hold back writes
                let _ = stream.set_nodelay(true);
                Ok(Box::new(stream))
            }
            NetworkKind::Udp => Ok(Box::new(UdpStream::connect(addr).await?)),
        }
    }
}

/// Connected UDP socket presented as a byte stream
///
/// Each read yields one datagram, truncated to the read buffer.
#[derive(Debug)]
pub struct UdpStream {
    socket: UdpSocket,
}

impl UdpStream {
    /// Resolve `addr`, bind an ephemeral socket of the same family and connect it
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let remote = lookup_host(addr).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address resolved for {}", addr),
            )
        })?;

        let local = if remote.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        Ok(Self { socket })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
