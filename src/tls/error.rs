//! TLS-specific error types
//!
//! This module defines errors that can occur while loading credential
//! files and building per-slot TLS contexts.

use std::path::PathBuf;
use thiserror::Error;

use crate::tls::SlotRole;

/// TLS-specific errors
///
/// These errors capture specific failure modes for credential handling,
/// with detailed context for debugging.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to load certificate from file
    #[error("Failed to load certificate from {path}: {reason}")]
    CertificateLoad {
        /// Path to the certificate file
        path: PathBuf,
        /// Reason for the failure
        reason: String,
    },

    /// Failed to load private key from file
    #[error("Failed to load private key from {path}: {reason}")]
    PrivateKeyLoad {
        /// Path to the key file
        path: PathBuf,
        /// Reason for the failure
        reason: String,
    },

    /// Failed to load certificate revocation list from file
    #[error("Failed to load CRL from {path}: {reason}")]
    CrlLoad {
        /// Path to the CRL file
        path: PathBuf,
        /// Reason for the failure
        reason: String,
    },

    /// Slot-level error (out of range, unpopulated, busy)
    #[error("TLS {role} slot {index}: {reason}")]
    Slot {
        /// Pool side the slot belongs to
        role: SlotRole,
        /// Slot index
        index: usize,
        /// Reason for the failure
        reason: String,
    },

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// I/O error during TLS operation
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TlsError {
    /// Create a certificate load error
    pub fn cert_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::CertificateLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a private key load error
    pub fn key_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::PrivateKeyLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a CRL load error
    pub fn crl_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::CrlLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a slot error
    pub fn slot(role: SlotRole, index: usize, reason: impl Into<String>) -> Self {
        TlsError::Slot {
            role,
            index,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        TlsError::Config(reason.into())
    }
}
