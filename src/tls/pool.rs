//! Slot-indexed TLS credential pool with exclusive checkout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::{SlotCredentialConfig, TlsPoolConfig};
use crate::tls::{load_certificates, load_crls, load_private_key, load_root_store, TlsError};

/// Which side of the pool a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    /// Server-side (virtual host) credential
    Server,
    /// Client-side (upstream-facing) credential
    Client,
}

impl fmt::Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRole::Server => write!(f, "server"),
            SlotRole::Client => write!(f, "client"),
        }
    }
}

/// Credential material and built configs for one slot.
struct SlotState {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    ca_paths: Vec<PathBuf>,
    crl_paths: Vec<PathBuf>,

    cert_chain: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    roots: RootCertStore,
    crls: Vec<CertificateRevocationListDer<'static>>,

    server_config: Option<Arc<ServerConfig>>,
    client_config: Option<Arc<ClientConfig>>,
}

impl SlotState {
    fn empty() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            ca_paths: Vec::new(),
            crl_paths: Vec::new(),
            cert_chain: Vec::new(),
            key: None,
            roots: RootCertStore::empty(),
            crls: Vec::new(),
            server_config: None,
            client_config: None,
        }
    }

    fn invalidate(&mut self) {
        self.server_config = None;
        self.client_config = None;
    }

    fn is_populated(&self) -> bool {
        !self.cert_chain.is_empty() || !self.roots.is_empty() || !self.crls.is_empty()
    }
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn build_server_config(
    state: &SlotState,
    index: usize,
) -> Result<Arc<ServerConfig>, TlsError> {
    if state.cert_chain.is_empty() {
        return Err(TlsError::slot(
            SlotRole::Server,
            index,
            "no server certificate configured",
        ));
    }
    let key = state
        .key
        .as_ref()
        .ok_or_else(|| TlsError::slot(SlotRole::Server, index, "no private key configured"))?
        .clone_key();

    let builder = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?;

    let builder = if state.roots.is_empty() {
        builder.with_no_client_auth()
    } else {
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(state.roots.clone()), crypto_provider())
                .with_crls(state.crls.iter().cloned())
                .build()
                .map_err(|e| {
                    TlsError::config(format!("Failed to build client verifier: {}", e))
                })?;
        builder.with_client_cert_verifier(verifier)
    };

    builder
        .with_single_cert(state.cert_chain.clone(), key)
        .map(Arc::new)
        .map_err(|e| TlsError::config(format!("Failed to build TLS config: {}", e)))
}

fn build_client_config(
    state: &SlotState,
    index: usize,
) -> Result<Arc<ClientConfig>, TlsError> {
    if state.roots.is_empty() {
        return Err(TlsError::slot(
            SlotRole::Client,
            index,
            "no trust anchors configured",
        ));
    }

    let builder = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?
        .with_root_certificates(state.roots.clone());

    let config = match (&state.cert_chain, &state.key) {
        (chain, Some(key)) if !chain.is_empty() => builder
            .with_client_auth_cert(chain.clone(), key.clone_key())
            .map_err(|e| TlsError::config(format!("Failed to build TLS config: {}", e)))?,
        _ => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Pool of TLS credential slots with an exclusive checkout discipline.
///
/// Server slots hold per-virtual-host certificate chains; client slots hold
/// trust material for upstream-facing use. `checkout` grants a slot to one
/// caller at a time — a concurrent checkout of the same slot waits until
/// the previous lease is released (dropped).
///
/// Population (`add_cert`/`add_ca`/`add_crl`) is synchronous and refuses a
/// slot that is currently leased; [`TlsContextPool::reload`] instead waits
/// for leases and re-reads every populated slot from its recorded paths.
pub struct TlsContextPool {
    server: Vec<Arc<Mutex<SlotState>>>,
    client: Vec<Arc<Mutex<SlotState>>>,
}

impl TlsContextPool {
    /// Allocate a pool sized for `client_slots` client and `server_slots`
    /// server credentials. Slots start unpopulated.
    pub fn new(client_slots: usize, server_slots: usize) -> Self {
        Self {
            server: (0..server_slots)
                .map(|_| Arc::new(Mutex::new(SlotState::empty())))
                .collect(),
            client: (0..client_slots)
                .map(|_| Arc::new(Mutex::new(SlotState::empty())))
                .collect(),
        }
    }

    /// Build a pool from configuration, populating every listed slot.
    ///
    /// # Errors
    ///
    /// Startup population is strict: any unreadable or unparsable file
    /// fails pool construction.
    pub fn from_config(config: &TlsPoolConfig) -> Result<Self, TlsError> {
        let pool = Self::new(config.client_slots, config.server_slots);
        for entry in &config.server {
            pool.populate_slot(SlotRole::Server, entry)?;
        }
        for entry in &config.client {
            pool.populate_slot(SlotRole::Client, entry)?;
        }
        Ok(pool)
    }

    fn populate_slot(&self, role: SlotRole, entry: &SlotCredentialConfig) -> Result<(), TlsError> {
        if let (Some(cert), Some(key)) = (&entry.cert_path, &entry.key_path) {
            self.add_cert(role, entry.slot, cert, key)?;
        }
        if let Some(ca) = &entry.ca_path {
            self.add_ca(role, entry.slot, ca)?;
        }
        if let Some(crl) = &entry.crl_path {
            self.add_crl(role, entry.slot, crl)?;
        }
        Ok(())
    }

    /// Number of slots on one side of the pool.
    pub fn slot_count(&self, role: SlotRole) -> usize {
        match role {
            SlotRole::Server => self.server.len(),
            SlotRole::Client => self.client.len(),
        }
    }

    fn slot(&self, role: SlotRole, index: usize) -> Result<&Arc<Mutex<SlotState>>, TlsError> {
        let slots = match role {
            SlotRole::Server => &self.server,
            SlotRole::Client => &self.client,
        };
        slots
            .get(index)
            .ok_or_else(|| TlsError::slot(role, index, "index out of range"))
    }

    fn lock_now(
        &self,
        role: SlotRole,
        index: usize,
    ) -> Result<OwnedMutexGuard<SlotState>, TlsError> {
        let slot = self.slot(role, index)?;
        Arc::clone(slot)
            .try_lock_owned()
            .map_err(|_| TlsError::slot(role, index, "slot is checked out"))
    }

    /// Set a slot's end-entity certificate chain and private key.
    ///
    /// # Errors
    ///
    /// Fails if the slot index is out of range, the slot is currently
    /// leased, or either file cannot be parsed as the expected PEM type.
    pub fn add_cert(
        &self,
        role: SlotRole,
        index: usize,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<(), TlsError> {
        let certs = load_certificates(cert_path)?;
        let key = load_private_key(key_path)?;

        let mut state = self.lock_now(role, index)?;
        state.cert_path = Some(cert_path.to_path_buf());
        state.key_path = Some(key_path.to_path_buf());
        state.cert_chain = certs;
        state.key = Some(key);
        state.invalidate();
        debug!(%role, slot = index, path = %cert_path.display(), "slot certificate set");
        Ok(())
    }

    /// Add a trust anchor bundle to a slot.
    ///
    /// Anchors accumulate across calls; for server slots they become the
    /// client-certificate trust bundle, for client slots the upstream
    /// verification roots.
    pub fn add_ca(&self, role: SlotRole, index: usize, ca_path: &Path) -> Result<(), TlsError> {
        let roots = load_root_store(ca_path)?;

        let mut state = self.lock_now(role, index)?;
        for anchor in roots.roots {
            state.roots.roots.push(anchor);
        }
        state.ca_paths.push(ca_path.to_path_buf());
        state.invalidate();
        debug!(%role, slot = index, path = %ca_path.display(), "slot trust anchors added");
        Ok(())
    }

    /// Add a certificate revocation list to a slot.
    ///
    /// CRLs are consulted by the server-side client-certificate verifier;
    /// on client slots they are recorded but unused (rustls clients do not
    /// perform CRL checks).
    pub fn add_crl(&self, role: SlotRole, index: usize, crl_path: &Path) -> Result<(), TlsError> {
        let crls = load_crls(crl_path)?;

        let mut state = self.lock_now(role, index)?;
        state.crls.extend(crls);
        state.crl_paths.push(crl_path.to_path_buf());
        state.invalidate();
        debug!(%role, slot = index, path = %crl_path.display(), "slot CRLs added");
        Ok(())
    }

    /// Check out a slot for exclusive use.
    ///
    /// Builds the slot's rustls config on first use. A concurrent checkout
    /// of the same slot waits here until the earlier lease is released.
    ///
    /// # Errors
    ///
    /// Fails if the index is out of range or the slot lacks the material
    /// its role requires (certificate+key for server, trust anchors for
    /// client).
    pub async fn checkout(
        &self,
        role: SlotRole,
        index: usize,
    ) -> Result<ContextLease, TlsError> {
        let slot = Arc::clone(self.slot(role, index)?);
        let mut guard = slot.lock_owned().await;

        match role {
            SlotRole::Server => {
                if guard.server_config.is_none() {
                    guard.server_config = Some(build_server_config(&guard, index)?);
                }
            }
            SlotRole::Client => {
                if guard.client_config.is_none() {
                    guard.client_config = Some(build_client_config(&guard, index)?);
                }
            }
        }

        Ok(ContextLease { role, index, guard })
    }

    /// Re-read every populated slot's credential files from their recorded
    /// paths and rebuild the configs.
    ///
    /// Waits for outstanding leases. A slot whose files fail to re-parse
    /// keeps its previous credential; the error is logged, not propagated.
    /// Returns the number of slots that were refreshed.
    pub async fn reload(&self) -> usize {
        let mut reloaded = 0;
        for (role, slots) in [
            (SlotRole::Server, &self.server),
            (SlotRole::Client, &self.client),
        ] {
            for (index, slot) in slots.iter().enumerate() {
                let mut state = Arc::clone(slot).lock_owned().await;
                match reload_slot(&mut state) {
                    Ok(true) => {
                        info!(%role, slot = index, "slot credentials reloaded");
                        reloaded += 1;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(%role, slot = index, %err, "slot reload failed, keeping previous credentials");
                    }
                }
            }
        }
        reloaded
    }
}

/// Re-read one slot from its recorded paths. Returns whether anything was
/// reloaded. On error the slot is left untouched.
fn reload_slot(state: &mut SlotState) -> Result<bool, TlsError> {
    if state.cert_path.is_none() && state.ca_paths.is_empty() && state.crl_paths.is_empty() {
        return Ok(false);
    }

    let mut cert_chain = Vec::new();
    let mut key = None;
    if let (Some(cert_path), Some(key_path)) = (&state.cert_path, &state.key_path) {
        cert_chain = load_certificates(cert_path)?;
        key = Some(load_private_key(key_path)?);
    }

    let mut roots = RootCertStore::empty();
    for ca_path in &state.ca_paths {
        let loaded = load_root_store(ca_path)?;
        for anchor in loaded.roots {
            roots.roots.push(anchor);
        }
    }

    let mut crls = Vec::new();
    for crl_path in &state.crl_paths {
        crls.extend(load_crls(crl_path)?);
    }

    state.cert_chain = cert_chain;
    state.key = key;
    state.roots = roots;
    state.crls = crls;
    state.invalidate();
    Ok(true)
}

/// Exclusive lease on one credential slot.
///
/// Dropping the lease (or calling [`ContextLease::release`]) returns the
/// slot to the pool and wakes the next waiting checkout.
pub struct ContextLease {
    role: SlotRole,
    index: usize,
    guard: OwnedMutexGuard<SlotState>,
}

impl std::fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("role", &self.role)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl ContextLease {
    /// Pool side this lease belongs to.
    pub fn role(&self) -> SlotRole {
        self.role
    }

    /// Slot index this lease holds.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The slot's server config; `Some` for server-role leases.
    pub fn server_config(&self) -> Option<Arc<ServerConfig>> {
        self.guard.server_config.clone()
    }

    /// The slot's client config; `Some` for client-role leases.
    pub fn client_config(&self) -> Option<Arc<ClientConfig>> {
        self.guard.client_config.clone()
    }

    /// Whether the slot holds any credential material.
    pub fn is_populated(&self) -> bool {
        self.guard.is_populated()
    }

    /// Return the slot to the pool.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn self_signed() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let signed = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = write_temp(&signed.cert.pem());
        let key = write_temp(&signed.key_pair.serialize_pem());
        (cert, key)
    }

    #[test]
    fn test_pool_slot_counts() {
        let pool = TlsContextPool::new(2, 3);
        assert_eq!(pool.slot_count(SlotRole::Client), 2);
        assert_eq!(pool.slot_count(SlotRole::Server), 3);
    }

    #[test]
    fn test_add_cert_out_of_range() {
        let pool = TlsContextPool::new(0, 1);
        let (cert, key) = self_signed();

        let err = pool
            .add_cert(SlotRole::Server, 1, cert.path(), key.path())
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let err = pool
            .add_cert(SlotRole::Client, 0, cert.path(), key.path())
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_add_cert_missing_file() {
        let pool = TlsContextPool::new(0, 1);
        let err = pool
            .add_cert(
                SlotRole::Server,
                0,
                Path::new("/nonexistent/cert.pem"),
                Path::new("/nonexistent/key.pem"),
            )
            .unwrap_err();
        assert!(matches!(err, TlsError::CertificateLoad { .. }));
    }

    #[test]
    fn test_add_cert_garbage_file() {
        let pool = TlsContextPool::new(0, 1);
        let garbage = write_temp("this is not PEM");
        let err = pool
            .add_cert(SlotRole::Server, 0, garbage.path(), garbage.path())
            .unwrap_err();
        assert!(err.to_string().contains("no certificates found"));
    }

    #[test]
    fn test_add_crl_garbage_file() {
        let pool = TlsContextPool::new(0, 1);
        let garbage = write_temp("not a CRL either");
        let err = pool
            .add_crl(SlotRole::Server, 0, garbage.path())
            .unwrap_err();
        assert!(matches!(err, TlsError::CrlLoad { .. }));
    }

    #[tokio::test]
    async fn test_checkout_out_of_range() {
        let pool = TlsContextPool::new(1, 1);
        let err = pool.checkout(SlotRole::Server, 5).await.unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn test_checkout_unpopulated_server_slot() {
        let pool = TlsContextPool::new(0, 1);
        let err = pool.checkout(SlotRole::Server, 0).await.unwrap_err();
        assert!(err.to_string().contains("no server certificate"));
    }

    #[tokio::test]
    async fn test_checkout_unpopulated_client_slot() {
        let pool = TlsContextPool::new(1, 0);
        let err = pool.checkout(SlotRole::Client, 0).await.unwrap_err();
        assert!(err.to_string().contains("no trust anchors"));
    }

    #[tokio::test]
    async fn test_checkout_server_slot() {
        let pool = TlsContextPool::new(0, 1);
        let (cert, key) = self_signed();
        pool.add_cert(SlotRole::Server, 0, cert.path(), key.path())
            .unwrap();

        let lease = pool.checkout(SlotRole::Server, 0).await.unwrap();
        assert_eq!(lease.role(), SlotRole::Server);
        assert_eq!(lease.index(), 0);
        assert!(lease.is_populated());
        assert!(lease.server_config().is_some());
        assert!(lease.client_config().is_none());
        lease.release();

        // Releasing allows the slot to be checked out again
        let again = pool.checkout(SlotRole::Server, 0).await.unwrap();
        assert!(again.server_config().is_some());
    }

    #[tokio::test]
    async fn test_checkout_client_slot_with_ca() {
        let pool = TlsContextPool::new(1, 0);
        let (cert, _key) = self_signed();
        pool.add_ca(SlotRole::Client, 0, cert.path()).unwrap();

        let lease = pool.checkout(SlotRole::Client, 0).await.unwrap();
        assert!(lease.client_config().is_some());
    }

    #[tokio::test]
    async fn test_add_cert_refused_while_leased() {
        let pool = TlsContextPool::new(0, 1);
        let (cert, key) = self_signed();
        pool.add_cert(SlotRole::Server, 0, cert.path(), key.path())
            .unwrap();

        let lease = pool.checkout(SlotRole::Server, 0).await.unwrap();
        let err = pool
            .add_cert(SlotRole::Server, 0, cert.path(), key.path())
            .unwrap_err();
        assert!(err.to_string().contains("checked out"));
        drop(lease);

        pool.add_cert(SlotRole::Server, 0, cert.path(), key.path())
            .unwrap();
    }

    #[tokio::test]
    async fn test_reload_refreshes_populated_slots() {
        let pool = TlsContextPool::new(0, 2);
        let (cert, key) = self_signed();
        pool.add_cert(SlotRole::Server, 0, cert.path(), key.path())
            .unwrap();

        // Slot 1 is unpopulated and should not count
        assert_eq!(pool.reload().await, 1);
    }

    #[tokio::test]
    async fn test_reload_keeps_slot_on_failure() {
        let pool = TlsContextPool::new(0, 1);
        let (cert, key) = self_signed();
        pool.add_cert(SlotRole::Server, 0, cert.path(), key.path())
            .unwrap();

        // Invalidate the backing files, then reload
        drop(cert);
        drop(key);
        assert_eq!(pool.reload().await, 0);

        // The previous credential still works
        let lease = pool.checkout(SlotRole::Server, 0).await.unwrap();
        assert!(lease.server_config().is_some());
    }
}
