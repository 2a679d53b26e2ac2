//! relayscan - a concurrent port scanner and banner grabber that can route
//! every probe through an HTTP or SOCKS5 proxy.
//!
//! The pieces compose bottom-up: a [`dialer::Dialer`] opens connections
//! (directly or through a proxy), [`scanner::PortScanner`] fans probes out over
//! a port range, and [`banner::BannerGrabber`] reads service greetings.

pub mod banner;
pub mod config;
pub mod dialer;
pub mod error;
pub mod logging;
pub mod network;
pub mod output;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use banner::{Banner, BannerGrabber, BannerResult};
pub use config::ReconConfig;
pub use dialer::{build_dialer, Dialer, DialerConfig, ProxyKind, RetryPolicy, SharedDialer};
pub use error::{ScanError, ScanResult};
pub use network::{NetworkKind, Target};
pub use scanner::{DialProbe, PortScanner, ScanOutcome, ScanPolicy, ScanReport};

pub type Result<T> = std::result::Result<T, ScanError>;
