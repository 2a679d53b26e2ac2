//! Configuration module for relayscan
//!
//! A run is described by [`ReconConfig`]. It is loaded from a TOML file
//! (`--config`, or `~/.relayscan.toml` when present), then overridden by
//! command-line flags and validated before any socket is opened.

use crate::banner::{
    BannerGrabber, DEFAULT_BANNER_ATTEMPTS, DEFAULT_BANNER_CONCURRENCY, DEFAULT_BUFFER_SIZE,
};
use crate::dialer::{DialerConfig, ProxyKind, RetryPolicy, SharedDialer, DEFAULT_DIAL_ATTEMPTS};
use crate::error::ScanError;
use crate::network::NetworkKind;
use crate::output::OutputFormat;
use crate::scanner::{ScanPolicy, DEFAULT_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-user configuration file
pub const DEFAULT_CONFIG_FILE: &str = ".relayscan.toml";

/// Main configuration structure for a reconnaissance run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Hosts, IPs or CIDR blocks
    pub targets: Vec<String>,

    /// Inclusive `[start, end]` port range
    pub port_range: [u16; 2],

    pub network: NetworkKind,

    /// Probes in flight at once
    pub concurrency: usize,

    /// Delay between probe dispatches in milliseconds
    pub scan_delay_ms: u64,

    /// Dial timeout in milliseconds
    pub timeout_ms: u64,

    pub proxy: ProxySettings,
    pub banner: BannerSettings,
    pub output: OutputSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub kind: ProxyKind,
    /// `host:port`
    pub address: String,
    pub username: String,
    pub password: String,
    pub attempts: u32,
    pub retry_delay_ms: u64,
}

/// Where a run's configuration came from
///
/// Loading happens before logging is initialized, so the outcome is kept
/// and reported with [`ConfigSource::log`] afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Defaults,
    File(PathBuf),
    Ignored { path: PathBuf, reason: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::Defaults => log::debug!("Using default configuration"),
            ConfigSource::File(path) => log::info!("Loaded config from {}", path.display()),
            ConfigSource::Ignored { path, reason } => {
                log::warn!("Ignoring {}: {}", path.display(), reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BannerSettings {
    /// Port to grab banners from; `None` skips banner grabbing
    pub port: Option<u16>,
    pub buffer_size: usize,
    pub concurrency: usize,
    pub attempts: u32,
    /// `None` keeps the grabber's built-in read timeout
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub file: Option<PathBuf>,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Append log lines to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            port_range: [1, 1024],
            network: NetworkKind::Tcp,
            concurrency: DEFAULT_CONCURRENCY,
            scan_delay_ms: 0,
            timeout_ms: 30_000,
            proxy: ProxySettings::default(),
            banner: BannerSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            kind: ProxyKind::Direct,
            address: String::new(),
            username: String::new(),
            password: String::new(),
            attempts: DEFAULT_DIAL_ATTEMPTS,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for BannerSettings {
    fn default() -> Self {
        Self {
            port: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            concurrency: DEFAULT_BANNER_CONCURRENCY,
            attempts: DEFAULT_BANNER_ATTEMPTS,
            read_timeout_ms: Some(5_000),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            file: None,
            format: OutputFormat::Text,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ReconConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `~/.relayscan.toml` if it exists and parses, defaults otherwise
    pub fn load_default_config() -> (Self, ConfigSource) {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::load_or_default(&home_dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Load `path` if it exists; a file that fails to parse falls back to defaults
    pub fn load_or_default(path: &Path) -> (Self, ConfigSource) {
        if !path.exists() {
            return (Self::default(), ConfigSource::Defaults);
        }

        match Self::from_toml_file(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (
                Self::default(),
                ConfigSource::Ignored {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                },
            ),
        }
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        ScanPolicy::new(self.port_range[0], self.port_range[1])
            .with_concurrency(self.concurrency)
            .with_scan_delay(Duration::from_millis(self.scan_delay_ms))
            .with_probe_timeout(self.timeout_duration())
    }

    pub fn dialer_config(&self) -> DialerConfig {
        DialerConfig::new(self.proxy.address.clone())
            .with_credentials(self.proxy.username.clone(), self.proxy.password.clone())
            .with_timeout(self.timeout_duration())
            .with_retry(RetryPolicy::new(
                self.proxy.attempts,
                Duration::from_millis(self.proxy.retry_delay_ms),
            ))
    }

    /// Banner grabber over `dialer` with this run's network and banner settings
    pub fn banner_grabber(&self, dialer: SharedDialer) -> BannerGrabber {
        let grabber = BannerGrabber::new(dialer)
            .with_network(self.network)
            .with_retry(RetryPolicy::immediate(self.banner.attempts))
            .with_concurrency(self.banner.concurrency);

        match self.banner.read_timeout_ms {
            Some(ms) => grabber.with_read_timeout(Duration::from_millis(ms)),
            None => grabber,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.targets.iter().all(|t| t.trim().is_empty()) {
            return Err(ScanError::InvalidTarget("No targets specified".to_string()));
        }

        self.scan_policy().validate()?;

        if self.timeout_ms == 0 {
            return Err(ScanError::Config("Timeout must be greater than 0".to_string()));
        }

        if self.proxy.kind != ProxyKind::Direct && self.proxy.address.trim().is_empty() {
            return Err(ScanError::EmptyProxyAddress);
        }

        if self.proxy.kind == ProxyKind::Socks5 && !self.network.is_tcp() {
            return Err(ScanError::UnsupportedNetwork(
                "SOCKS5 proxies only carry tcp probes".to_string(),
            ));
        }

        if self.banner.port == Some(0) {
            return Err(ScanError::PortRange("Banner port must be in 1-65535".to_string()));
        }

        if self.banner.buffer_size == 0 {
            return Err(ScanError::Config("Buffer size must be greater than 0".to_string()));
        }

        if self.banner.concurrency == 0 {
            return Err(ScanError::Config(
                "Banner concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
