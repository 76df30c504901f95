//! Hot-reloaded TLS credentials.
//!
//! This crate provides:
//! - A file-backed credential store holding a keypair and a CA pool
//! - A filesystem event source that also sees files created later
//! - A watcher that coalesces change bursts and reloads the affected role
//! - A deferred variant that hands out the watcher once it is ready

pub mod error;
pub mod fswatcher;
pub mod signal;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use certwatch_core::{CredentialPaths, PathRole, TrackedPath, WatcherConfig};
pub use error::{CertError, Result};
pub use fswatcher::{EventSender, FileEvent, FileOp, FsWatcher};
pub use signal::{ReadyListener, ReadySignal, StopHandle};
pub use store::{CaPool, Certificate, CertificateInfo, CredentialStore, FileReloader, Keypair};
pub use watcher::{future_watcher, future_watcher_with_source, FutureWatcher, Watcher};
