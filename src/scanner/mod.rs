//! Port scanner: policy, probe strategies and scan results

pub mod engine;

use crate::dialer::SharedDialer;
use crate::error::ScanError;
use crate::network::{NetworkKind, Target};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use engine::PortScanner;

/// Default number of probes allowed in flight
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Default per-probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// How a port range is swept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPolicy {
    pub start_port: u16,
    pub end_port: u16,
    /// Maximum probes in flight at once
    pub concurrency: usize,
    /// Pause between successive dispatches
    pub scan_delay: Duration,
    pub probe_timeout: Duration,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            start_port: 1,
            end_port: 65535,
            concurrency: DEFAULT_CONCURRENCY,
            scan_delay: Duration::ZERO,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ScanPolicy {
    pub fn new(start_port: u16, end_port: u16) -> Self {
        Self {
            start_port,
            end_port,
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_scan_delay(mut self, scan_delay: Duration) -> Self {
        self.scan_delay = scan_delay;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Number of ports in the range
    pub fn port_count(&self) -> usize {
        if self.end_port < self.start_port {
            0
        } else {
            (self.end_port - self.start_port) as usize + 1
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.start_port == 0 {
            return Err(ScanError::PortRange("Ports start at 1".to_string()));
        }
        if self.start_port > self.end_port {
            return Err(ScanError::PortRange(format!(
                "Start port {} is greater than end port {}",
                self.start_port, self.end_port
            )));
        }
        if self.concurrency == 0 {
            return Err(ScanError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of probing one target; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub target: Target,
    pub reachable: bool,
    pub message: Option<String>,
    pub elapsed: Duration,
}

impl ScanOutcome {
    pub fn reachable(target: Target, elapsed: Duration) -> Self {
        Self {
            target,
            reachable: true,
            message: None,
            elapsed,
        }
    }

    pub fn unreachable(target: Target, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            target,
            reachable: false,
            message: Some(message.into()),
            elapsed,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Aggregate result of a scan run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub host: String,
    pub network: NetworkKind,
    pub outcomes: Vec<ScanOutcome>,
    pub reachable: usize,
    pub unreachable: usize,
    pub duration: Duration,
    /// The run was aborted before every port was probed
    pub cancelled: bool,
}

impl ScanReport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: ScanOutcome) {
        if outcome.reachable {
            self.reachable += 1;
        } else {
            self.unreachable += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn total(&self) -> usize {
        self.reachable + self.unreachable
    }

    /// Every probed port failed (and at least one was probed)
    pub fn all_failed(&self) -> bool {
        self.total() > 0 && self.reachable == 0
    }

    /// Reachable ports, ascending
    pub fn open_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .outcomes
            .iter()
            .filter(|o| o.reachable)
            .map(|o| o.target.port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Sort outcomes by port for stable output
    pub fn sort_outcomes(&mut self) {
        self.outcomes.sort_by_key(|o| o.target.port);
    }
}

/// Attempt one target and report whether it is reachable
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &Target) -> crate::Result<Option<String>>;

    /// Network kind, used in log lines
    fn network(&self) -> NetworkKind;
}

/// Connect-then-close probe built on a [`Dialer`](crate::dialer::Dialer)
///
/// For UDP a successful connect only means a socket could be associated with
/// the address; the outcome says so in its message.
#[derive(Clone)]
pub struct DialProbe {
    dialer: SharedDialer,
    network: NetworkKind,
}

impl DialProbe {
    pub fn new(dialer: SharedDialer, network: NetworkKind) -> Self {
        Self { dialer, network }
    }

    pub fn tcp(dialer: SharedDialer) -> Self {
        Self::new(dialer, NetworkKind::Tcp)
    }

    pub fn udp(dialer: SharedDialer) -> Self {
        Self::new(dialer, NetworkKind::Udp)
    }
}

#[async_trait]
impl Probe for DialProbe {
    async fn probe(&self, target: &Target) -> crate::Result<Option<String>> {
        let conn = self.dialer.dial(self.network, &target.address()).await?;
        // Liveness only; no data exchange
        if let Err(e) = conn.close().await {
            log::debug!("Closing probe connection to {} failed: {}", target, e);
        }
        Ok(match self.network {
            NetworkKind::Tcp => None,
            NetworkKind::Udp => Some("udp connect succeeded (inconclusive)".to_string()),
        })
    }

    fn network(&self) -> NetworkKind {
        self.network
    }
}
