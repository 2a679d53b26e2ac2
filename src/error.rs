//! Error handling for relayscan
//!
//! Every fallible operation in the crate returns [`ScanError`]. Per-port and
//! per-host failures are recovered inside the scanner and the banner grabber;
//! only construction-time misconfiguration reaches the caller directly.

use thiserror::Error;

/// Main error type for dialing, probing and banner grabbing
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Proxy address cannot be empty")]
    EmptyProxyAddress,

    #[error("Timeout error")]
    Timeout,

    #[error("Failed to connect after {0} attempts")]
    DialExhausted(u32),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Read failure: {0}")]
    ReadFailure(String),

    #[error("Failed to grab banner from {addr} after {attempts} attempts")]
    BannerGrabExhausted { addr: String, attempts: u32 },

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Port range error: {0}")]
    PortRange(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Whether another attempt at the same operation could succeed.
    ///
    /// Configuration errors are terminal; network-level failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScanError::Timeout
                | ScanError::ConnectFailed(_)
                | ScanError::ReadFailure(_)
                | ScanError::Proxy(_)
                | ScanError::Io(_)
        )
    }
}

impl From<tokio::time::error::Elapsed> for ScanError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ScanError::Timeout
    }
}

impl From<std::num::ParseIntError> for ScanError {
    fn from(e: std::num::ParseIntError) -> Self {
        ScanError::PortRange(e.to_string())
    }
}

impl From<tokio_socks::Error> for ScanError {
    fn from(e: tokio_socks::Error) -> Self {
        match e {
            tokio_socks::Error::Io(io) => ScanError::Io(io),
            other => ScanError::Proxy(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(e: toml::de::Error) -> Self {
        ScanError::Config(format!("Failed to parse TOML: {}", e))
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(e: serde_json::Error) -> Self {
        ScanError::Output(e.to_string())
    }
}

impl From<csv::Error> for ScanError {
    fn from(e: csv::Error) -> Self {
        ScanError::Output(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ScanError::Timeout.is_recoverable());
        assert!(ScanError::ConnectFailed("refused".to_string()).is_recoverable());
        assert!(!ScanError::EmptyProxyAddress.is_recoverable());
        assert!(!ScanError::DialExhausted(3).is_recoverable());
        assert!(!ScanError::Config("bad".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ScanError::DialExhausted(3).to_string(),
            "Failed to connect after 3 attempts"
        );
        let err = ScanError::BannerGrabExhausted {
            addr: "10.0.0.1:22".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Failed to grab banner from 10.0.0.1:22 after 3 attempts"
        );
    }

    #[tokio::test]
    async fn test_elapsed_converts_to_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert!(matches!(ScanError::from(elapsed), ScanError::Timeout));
    }
}
