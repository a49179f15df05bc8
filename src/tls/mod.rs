//! TLS credential pool for tapproxy
//!
//! This module manages the proxy's TLS credential material:
//! - **Server slots**: per-virtual-host certificate/key pairs, optionally
//!   with a client-auth trust bundle and revocation lists
//! - **Client slots**: trust anchors (and optional client certificates)
//!   for upstream-facing use
//!
//! Slots are indexed and checked out for exclusive use by one caller at a
//! time; see [`TlsContextPool`]. Credentials are PEM files on disk, parsed
//! with `rustls-pemfile`, and can be re-read in place via
//! [`TlsContextPool::reload`].

mod error;
mod pool;

pub use error::TlsError;
pub use pool::{ContextLease, SlotRole, TlsContextPool};

// Shared utilities for loading credential material
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load certificates from a PEM file
///
/// Reads all certificates from a PEM-encoded file and returns them as
/// a vector of `CertificateDer`. This supports certificate chains.
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::cert_load(path, "no certificates found in file"));
    }

    Ok(certs)
}

/// Load a private key from a PEM file
///
/// Reads a private key from a PEM-encoded file. Supports RSA, PKCS8, and EC keys.
pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}

/// Load trust anchors from a PEM bundle into a root store
pub(crate) fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let certs = load_certificates(path)?;
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| TlsError::cert_load(path, e.to_string()))?;
    }
    Ok(roots)
}

/// Load certificate revocation lists from a PEM file
pub(crate) fn load_crls(
    path: &Path,
) -> Result<Vec<CertificateRevocationListDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::crl_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    let crls: Vec<CertificateRevocationListDer<'static>> = rustls_pemfile::crls(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::crl_load(path, e.to_string()))?;

    if crls.is_empty() {
        return Err(TlsError::crl_load(path, "no CRLs found in file"));
    }

    Ok(crls)
}
