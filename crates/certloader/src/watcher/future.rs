//! Deliver a watcher once its files exist and have been loaded.
//!
//! Useful when the file paths are well known but the files are written
//! later (e.g. by a certificate issuer). Only the parent directories must
//! exist up front.

use std::time::Duration;

use certwatch_core::WatcherConfig;
use tokio::sync::oneshot;
use tracing::debug;

use super::{new_fs_watcher, Watcher};
use crate::error::Result;
use crate::fswatcher::FsWatcher;
use crate::signal::StopHandle;
use crate::store::{CredentialStore, FileReloader};

/// A watcher that is handed over through `ready` once the store is ready.
///
/// If the watcher is stopped first, `ready` resolves to an error without a
/// value: the watcher stopped before becoming ready, there is nothing to
/// retry. Dropping the `FutureWatcher` before delivery stops the watcher.
#[derive(Debug)]
pub struct FutureWatcher<S: CredentialStore = FileReloader> {
    pub ready: oneshot::Receiver<Watcher<S>>,
    pub stop: StopHandle,
}

/// Watch files that may not exist yet. Must be called from within a Tokio
/// runtime.
pub fn future_watcher(config: &WatcherConfig) -> Result<FutureWatcher<FileReloader>> {
    let store = FileReloader::new(config.paths.clone())?;
    let source = new_fs_watcher(config)?;
    Ok(future_watcher_with_source(store, source, config.coalesce_window))
}

pub fn future_watcher_with_source<S: CredentialStore>(
    store: S,
    source: FsWatcher,
    coalesce_window: Duration,
) -> FutureWatcher<S> {
    // The event source already exists here, so a file written while the
    // eager reload runs still produces an event for the loop.
    let mut watcher = Watcher::with_source(store, source, coalesce_window);
    let stop = watcher.stop_handle();
    let (mut tx, ready) = oneshot::channel();

    tokio::spawn(async move {
        // Reloaded separately: a half-ready store only needs an event for
        // the missing role to become ready.
        let keypair = watcher.store().reload_keypair();
        let ca = watcher.store().reload_ca();
        let mut listener = match watcher.watch() {
            Ok(listener) => listener,
            Err(_) => return,
        };

        if keypair.is_ok() && ca.is_ok() {
            debug!("TLS configuration ready");
            deliver(tx, watcher);
            return;
        }
        if let Err(e) = &keypair {
            debug!(error = %e, "keypair not loaded yet");
        }
        if let Err(e) = &ca {
            debug!(error = %e, "CA not loaded yet");
        }

        debug!("Waiting on fsnotify update to be ready");
        let stop = watcher.stop_handle();
        let became_ready = tokio::select! {
            true = listener.wait() => true,
            _ = stop.wait() => {
                debug!("watcher stopped before becoming ready");
                false
            }
            _ = tx.closed() => {
                debug!("future watcher dropped before becoming ready, stopping");
                watcher.stop();
                false
            }
        };
        if became_ready {
            debug!("TLS configuration ready");
            deliver(tx, watcher);
        }
    });

    FutureWatcher { ready, stop }
}

/// Hand the watcher over; stop it if nobody is waiting anymore.
fn deliver<S: CredentialStore>(tx: oneshot::Sender<Watcher<S>>, watcher: Watcher<S>) {
    if let Err(watcher) = tx.send(watcher) {
        debug!("future watcher receiver dropped, stopping");
        watcher.stop();
    }
}
