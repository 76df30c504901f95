//! Error types for credential loading and watching.

use std::path::PathBuf;

use certwatch_core::ConfigError;

/// Errors that can occur while loading or watching TLS credentials.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    /// Invalid path configuration.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A credential file could not be read.
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The certificate file holds no `CERTIFICATE` block.
    #[error("no certificate found in {}", .0.display())]
    NoCertificate(PathBuf),

    /// The key file holds no `PRIVATE KEY` block.
    #[error("no PKCS#8 private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    /// Malformed PEM or X.509 data.
    #[error("invalid certificate in {}: {reason}", path.display())]
    Certificate { path: PathBuf, reason: String },

    /// Malformed private key.
    #[error("invalid private key in {}: {reason}", path.display())]
    PrivateKey { path: PathBuf, reason: String },

    /// The private key does not belong to the leaf certificate.
    #[error("private key {} does not match certificate {}", key.display(), cert.display())]
    KeyMismatch { cert: PathBuf, key: PathBuf },

    /// A CA file contributed no certificate to the pool.
    #[error("no CA certificate found in {}", .0.display())]
    NoCaCertificates(PathBuf),

    /// Filesystem watcher error.
    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The store did not become ready where it was required to.
    #[error("TLS credentials are not ready")]
    NotReady,

    /// The event loop of a watcher can only be started once.
    #[error("watcher already started")]
    AlreadyStarted,
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, CertError>;
