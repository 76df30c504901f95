//! File-backed [`CredentialStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use certwatch_core::CredentialPaths;
use tracing::debug;

use super::material::{CaPool, Keypair};
use super::CredentialStore;
use crate::error::{CertError, Result};

/// Holds the keypair and CA pool read from a fixed set of PEM files.
///
/// Files are parsed completely before the stored value is swapped, so
/// readers see either the previous material or the new one.
#[derive(Debug)]
pub struct FileReloader {
    paths: CredentialPaths,
    keypair: RwLock<Option<Arc<Keypair>>>,
    ca_pool: RwLock<Option<Arc<CaPool>>>,
    /// Bumped on every successful CA reload.
    ca_generation: AtomicU64,
}

impl FileReloader {
    /// Create a reloader without reading any file.
    ///
    /// The files may not exist yet; the reloader is not ready until both
    /// configured roles have been reloaded.
    pub fn new(paths: CredentialPaths) -> Result<Self> {
        paths.validate()?;
        Ok(Self {
            paths,
            keypair: RwLock::new(None),
            ca_pool: RwLock::new(None),
            ca_generation: AtomicU64::new(0),
        })
    }

    /// Create a reloader and load every configured file immediately.
    pub fn new_ready(paths: CredentialPaths) -> Result<Self> {
        let reloader = Self::new(paths)?;
        reloader.reload()?;
        if !reloader.ready() {
            return Err(CertError::NotReady);
        }
        Ok(reloader)
    }

    pub fn has_keypair(&self) -> bool {
        self.paths.has_keypair()
    }

    pub fn has_custom_ca(&self) -> bool {
        self.paths.has_custom_ca()
    }

    /// Reload both roles; the keypair is attempted first.
    ///
    /// A CA reload still happens when the keypair reload fails; the first
    /// error is returned.
    pub fn reload(&self) -> Result<(Option<Arc<Keypair>>, Option<Arc<CaPool>>)> {
        let keypair = self.reload_keypair();
        let ca_pool = self.reload_ca();
        Ok((keypair?, ca_pool?))
    }

    pub fn keypair(&self) -> Option<Arc<Keypair>> {
        self.keypair.read().expect("keypair lock poisoned").clone()
    }

    pub fn ca_pool(&self) -> Option<Arc<CaPool>> {
        self.ca_pool.read().expect("ca_pool lock poisoned").clone()
    }

    /// Snapshot of both values.
    pub fn keypair_and_ca_pool(&self) -> (Option<Arc<Keypair>>, Option<Arc<CaPool>>) {
        (self.keypair(), self.ca_pool())
    }

    /// Number of successful CA reloads so far.
    ///
    /// Lets consumers that derive state from the pool (verifiers, client
    /// configs) rebuild only when it changed.
    pub fn ca_generation(&self) -> u64 {
        self.ca_generation.load(Ordering::Acquire)
    }
}

impl CredentialStore for FileReloader {
    type Keypair = Keypair;
    type CaPool = CaPool;

    fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    fn reload_keypair(&self) -> Result<Option<Arc<Keypair>>> {
        let (Some(cert), Some(key)) = (&self.paths.cert_file, &self.paths.key_file) else {
            return Ok(None);
        };
        let keypair = Arc::new(Keypair::from_pem_files(cert, key)?);
        *self.keypair.write().expect("keypair lock poisoned") = Some(Arc::clone(&keypair));
        debug!(serial = %keypair.id(), cert = %cert.display(), "keypair reloaded");
        Ok(Some(keypair))
    }

    fn reload_ca(&self) -> Result<Option<Arc<CaPool>>> {
        if !self.has_custom_ca() {
            return Ok(None);
        }
        let pool = Arc::new(CaPool::from_pem_files(&self.paths.ca_files)?);
        *self.ca_pool.write().expect("ca_pool lock poisoned") = Some(Arc::clone(&pool));
        let generation = self.ca_generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(certs = pool.len(), generation, "CA pool reloaded");
        Ok(Some(pool))
    }

    fn ready(&self) -> bool {
        let (keypair, ca_pool) = self.keypair_and_ca_pool();
        if self.has_keypair() && keypair.is_none() {
            return false;
        }
        if self.has_custom_ca() && ca_pool.is_none() {
            return false;
        }
        true
    }

    fn keypair_id(keypair: &Keypair) -> String {
        keypair.id().to_string()
    }
}
