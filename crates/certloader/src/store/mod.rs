//! Credential stores: hold the current keypair and CA pool and reload them
//! from disk on request.
//!
//! The watcher only talks to a store through [`CredentialStore`]; the
//! file-backed [`FileReloader`] is the production implementation.

mod material;
mod reloader;

use std::sync::Arc;

use certwatch_core::CredentialPaths;

use crate::error::Result;

pub use self::material::{CaPool, Certificate, CertificateInfo, Keypair};
pub use self::reloader::FileReloader;

/// Reload operations and readiness of a set of TLS credentials.
///
/// Each reload either atomically replaces the stored value or leaves the
/// previous value untouched and returns the error. A role with no configured
/// files reloads to `Ok(None)`.
pub trait CredentialStore: Send + Sync + 'static {
    type Keypair: Send + Sync;
    type CaPool: Send + Sync;

    /// Files backing this store.
    fn paths(&self) -> &CredentialPaths;

    fn reload_keypair(&self) -> Result<Option<Arc<Self::Keypair>>>;

    fn reload_ca(&self) -> Result<Option<Arc<Self::CaPool>>>;

    /// True once every configured role has loaded successfully at least once.
    fn ready(&self) -> bool;

    /// Short identity of a keypair for logs.
    fn keypair_id(keypair: &Self::Keypair) -> String;
}
