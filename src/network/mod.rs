//! Network primitives shared by the dialers, the scanner and the banner grabber

pub mod socket;

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

pub use socket::{BoxedStream, Stream, TokioTransport, Transport, UdpStream};

/// Transport-level network kind used when dialing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    #[default]
    Tcp,
    Udp,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Tcp => "tcp",
            NetworkKind::Udp => "udp",
        }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, NetworkKind::Tcp)
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" | "tcp4" | "tcp6" => Ok(NetworkKind::Tcp),
            "udp" | "udp4" | "udp6" => Ok(NetworkKind::Udp),
            other => Err(ScanError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// A single (host, port) destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Create a target, rejecting an empty host and port 0
    pub fn new(host: impl Into<String>, port: u16) -> crate::Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ScanError::InvalidTarget("Host cannot be empty".to_string()));
        }
        if port == 0 {
            return Err(ScanError::PortRange("Port must be in 1-65535".to_string()));
        }
        Ok(Self { host, port })
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Join a host and a port into a dialable address
pub fn join_host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]:{}", v6, port),
        _ => format!("{}:{}", host, port),
    }
}
