//! Error types for tapproxy

use thiserror::Error;

use crate::tls::TlsError;

/// Main error type for the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Packet capture error
    #[error("Capture error: {0}")]
    Capture(String),

    /// Background task failure
    #[error("Task error: {0}")]
    Task(String),

    /// TLS/credential error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

/// Result type alias for ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}

impl From<pcap::Error> for ProxyError {
    fn from(err: pcap::Error) -> Self {
        ProxyError::Capture(err.to_string())
    }
}
