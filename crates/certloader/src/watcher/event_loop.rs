//! The watcher's background task.
//!
//! Filesystem events are classified by role, each role gets at most one
//! pending reload deadline, and an expired deadline reloads that role in the
//! store. Everything here is owned by the single loop task.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use certwatch_core::CredentialPaths;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::fswatcher::{FileEvent, FsWatcher};
use crate::signal::ReadySignal;
use crate::store::CredentialStore;

/// Which reload a path triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Reload {
    Keypair,
    Ca,
}

/// Path to role lookup, built once at loop start.
#[derive(Debug, Default)]
pub(super) struct RoleMap {
    keypair: HashSet<PathBuf>,
    ca: HashSet<PathBuf>,
}

impl RoleMap {
    pub(super) fn new(paths: &CredentialPaths) -> Self {
        let mut map = Self::default();
        for tracked in paths.tracked_paths() {
            if tracked.role.is_keypair() {
                map.keypair.insert(tracked.path);
            } else {
                map.ca.insert(tracked.path);
            }
        }
        map
    }

    /// Keypair membership is checked first.
    pub(super) fn classify(&self, path: &Path) -> Option<Reload> {
        if self.keypair.contains(path) {
            Some(Reload::Keypair)
        } else if self.ca.contains(path) {
            Some(Reload::Ca)
        } else {
            None
        }
    }
}

/// Per-role reload deadlines; at most one is armed per role.
#[derive(Debug, Default)]
struct Pending {
    keypair: Option<Instant>,
    ca: Option<Instant>,
}

impl Pending {
    /// Arm the role's deadline unless one is already pending.
    fn arm(&mut self, reload: Reload, window: Duration) -> bool {
        let slot = match reload {
            Reload::Keypair => &mut self.keypair,
            Reload::Ca => &mut self.ca,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(Instant::now() + window);
        true
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub(super) struct EventLoop<S: CredentialStore> {
    pub(super) store: Arc<S>,
    pub(super) source: FsWatcher,
    pub(super) window: Duration,
    pub(super) ready: ReadySignal,
    pub(super) stop: watch::Receiver<bool>,
    pub(super) finished: watch::Sender<bool>,
}

impl<S: CredentialStore> EventLoop<S> {
    pub(super) async fn run(self) {
        let EventLoop {
            store,
            mut source,
            window,
            ready,
            mut stop,
            finished,
        } = self;
        let roles = RoleMap::new(store.paths());
        let mut pending = Pending::default();

        loop {
            if *stop.borrow_and_update() {
                info!("Stopping fswatcher");
                break;
            }
            let (events, errors) = source.streams();
            tokio::select! {
                Some(event) = events.recv() => {
                    on_event(&roles, &mut pending, window, event);
                }
                _ = expired(pending.keypair) => {
                    pending.keypair = None;
                    reload_keypair(store.as_ref(), &ready);
                }
                _ = expired(pending.ca) => {
                    pending.ca = None;
                    reload_ca(store.as_ref(), &ready);
                }
                Some(error) = errors.recv() => {
                    warn!(error = %error, "fswatcher error");
                }
                changed = stop.changed() => {
                    // Every stop handle is gone: nobody can stop us later.
                    if changed.is_err() {
                        info!("Stop handles dropped, stopping fswatcher");
                        break;
                    }
                }
            }
        }

        // Armed deadlines are abandoned; no pending reload is forced.
        source.close();
        finished.send_replace(true);
    }
}

fn on_event(roles: &RoleMap, pending: &mut Pending, window: Duration, event: FileEvent) {
    debug!(path = %event.path.display(), op = %event.op, "Received fswatcher event");
    match roles.classify(&event.path) {
        Some(reload) => {
            if pending.arm(reload, window) {
                debug!(role = ?reload, window_ms = window.as_millis() as u64, "reload scheduled");
            }
        }
        None => {
            warn!(path = %event.path.display(), op = %event.op, "Unknown file, ignoring.");
        }
    }
}

fn reload_keypair<S: CredentialStore>(store: &S, ready: &ReadySignal) {
    let keypair = match store.reload_keypair() {
        Ok(keypair) => keypair,
        Err(e) => {
            warn!(error = %e, "Keypair update failed");
            return;
        }
    };
    let id = keypair
        .as_deref()
        .map(S::keypair_id)
        .unwrap_or_else(|| "<none>".to_string());
    info!(serial = %id, "Keypair updated");
    mark_ready(store, ready);
}

fn reload_ca<S: CredentialStore>(store: &S, ready: &ReadySignal) {
    if let Err(e) = store.reload_ca() {
        warn!(error = %e, "Certificate authority update failed");
        return;
    }
    info!("Certificate authority updated");
    mark_ready(store, ready);
}

fn mark_ready<S: CredentialStore>(store: &S, ready: &ReadySignal) {
    if store.ready() && ready.fire() {
        info!("TLS configuration ready");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_keypair() {
        let paths = CredentialPaths::new(
            ["/tls/tls.crt", "/tls/ca.crt"],
            Some(PathBuf::from("/tls/tls.crt")),
            Some(PathBuf::from("/tls/tls.key")),
        );
        let roles = RoleMap::new(&paths);
        assert_eq!(roles.classify(&PathBuf::from("/tls/tls.crt")), Some(Reload::Keypair));
        assert_eq!(roles.classify(&PathBuf::from("/tls/tls.key")), Some(Reload::Keypair));
        assert_eq!(roles.classify(&PathBuf::from("/tls/ca.crt")), Some(Reload::Ca));
        assert_eq!(roles.classify(&PathBuf::from("/tls/other")), None);
    }

    #[test]
    fn pending_arms_once_per_role() {
        let mut pending = Pending::default();
        let window = Duration::from_millis(100);
        assert!(pending.arm(Reload::Keypair, window));
        assert!(!pending.arm(Reload::Keypair, window));
        assert!(pending.arm(Reload::Ca, window));
        pending.keypair = None;
        assert!(pending.arm(Reload::Keypair, window));
    }
}
