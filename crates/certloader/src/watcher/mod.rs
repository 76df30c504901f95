//! Keeps a [`CredentialStore`] fresh by reloading it when its files change.
//!
//! A [`Watcher`] owns one background task. Events for the certificate or key
//! file schedule a keypair reload, events for a CA file schedule a CA reload;
//! bursts within the coalesce window collapse into a single reload per role.
//! Reload failures are logged and the last good material stays in place.

mod event_loop;
mod future;


use std::sync::Arc;
use std::time::Duration;

use certwatch_core::WatcherConfig;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{CertError, Result};
use crate::fswatcher::FsWatcher;
use crate::signal::{ReadyListener, ReadySignal, StopHandle};
use crate::store::{CredentialStore, FileReloader};

use self::event_loop::EventLoop;

pub use self::future::{future_watcher, future_watcher_with_source, FutureWatcher};

/// A credential store plus the task that reloads it on file changes.
///
/// The loop runs until [`Watcher::stop`] is called or every [`StopHandle`]
/// for it (including the one held by the watcher itself) is dropped. A
/// stopped watcher cannot be restarted.
pub struct Watcher<S: CredentialStore = FileReloader> {
    store: Arc<S>,
    /// Taken by the loop task on `watch`.
    source: Option<FsWatcher>,
    coalesce_window: Duration,
    stop: StopHandle,
    finished: watch::Receiver<bool>,
    finished_tx: Option<watch::Sender<bool>>,
}

impl Watcher<FileReloader> {
    /// Load every configured file and start watching them.
    ///
    /// The files must exist and be valid; the returned watcher is ready.
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &WatcherConfig) -> Result<Self> {
        let store = FileReloader::new_ready(config.paths.clone())?;
        let source = new_fs_watcher(config)?;
        let mut watcher = Self::with_source(store, source, config.coalesce_window);
        watcher.watch()?;
        Ok(watcher)
    }
}

impl<S: CredentialStore> Watcher<S> {
    /// Pair a store with an event source without starting the loop.
    pub fn with_source(store: S, source: FsWatcher, coalesce_window: Duration) -> Self {
        let (finished_tx, finished) = watch::channel(false);
        Self {
            store: Arc::new(store),
            source: Some(source),
            coalesce_window,
            stop: StopHandle::new(),
            finished,
            finished_tx: Some(finished_tx),
        }
    }

    /// Start the event loop.
    ///
    /// The returned listener completes the first time a reload leaves the
    /// store ready. It is not completed by a store that was already ready
    /// before `watch`; check [`CredentialStore::ready`] for that.
    pub fn watch(&mut self) -> Result<ReadyListener> {
        let (Some(source), Some(finished)) = (self.source.take(), self.finished_tx.take()) else {
            return Err(CertError::AlreadyStarted);
        };
        let ready = ReadySignal::new();
        let listener = ready.listener();
        let event_loop = EventLoop {
            store: Arc::clone(&self.store),
            source,
            window: self.coalesce_window,
            ready,
            stop: self.stop.subscribe(),
            finished,
        };
        tokio::spawn(event_loop.run());
        debug!(window_ms = self.coalesce_window.as_millis() as u64, "watcher started");
        Ok(listener)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Request the loop to stop. Safe to call any number of times, from
    /// any thread.
    pub fn stop(&self) {
        if self.stop.stop() {
            debug!("watcher stop requested");
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Wait until the loop task has exited and released the event source.
    ///
    /// Returns immediately for a watcher whose loop was never started.
    pub async fn stopped(&self) {
        if self.finished_tx.is_some() {
            return;
        }
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }
}

impl<S: CredentialStore> std::fmt::Debug for Watcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("started", &self.finished_tx.is_none())
            .field("stopped", &self.is_stopped())
            .field("coalesce_window", &self.coalesce_window)
            .finish_non_exhaustive()
    }
}

/// Event source over every configured file.
fn new_fs_watcher(config: &WatcherConfig) -> Result<FsWatcher> {
    let files: Vec<_> = config
        .paths
        .tracked_paths()
        .into_iter()
        .map(|t| t.path)
        .collect();
    FsWatcher::new(&files, config.event_buffer)
}
