//! Filesystem event source for a fixed set of files.
//!
//! `notify` watches directories, not paths that may not exist yet, so the
//! parent directory of every tracked file is watched non-recursively and
//! events are filtered down to the tracked files. Creating a tracked file
//! later is therefore reported like any other change.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Kind of change reported for a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOp {
    Create,
    Write,
    Rename,
    Remove,
    Chmod,
    Other,
}

impl FileOp {
    /// `None` for events that do not change the file (plain reads, opens).
    fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(FileOp::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(FileOp::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(FileOp::Chmod),
            EventKind::Modify(_) => Some(FileOp::Write),
            EventKind::Remove(_) => Some(FileOp::Remove),
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FileOp::Write),
            EventKind::Access(_) => None,
            EventKind::Any | EventKind::Other => Some(FileOp::Other),
        }
    }
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOp::Create => "CREATE",
            FileOp::Write => "WRITE",
            FileOp::Rename => "RENAME",
            FileOp::Remove => "REMOVE",
            FileOp::Chmod => "CHMOD",
            FileOp::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// A change to one tracked file, reported under its configured path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub op: FileOp,
}

/// Tracked file names per canonical parent directory.
#[derive(Debug, Default)]
struct Routes {
    dirs: HashMap<PathBuf, HashMap<OsString, PathBuf>>,
}

impl Routes {
    fn lookup_dir(&self, dir: &Path) -> Option<&HashMap<OsString, PathBuf>> {
        if let Some(files) = self.dirs.get(dir) {
            return Some(files);
        }
        // Some backends report paths under a different spelling of the
        // watched directory (symlinked temp dirs on macOS, relative paths).
        let canonical = std::fs::canonicalize(dir).ok()?;
        self.dirs.get(&canonical)
    }

    /// Map a raw notify event to events on tracked files.
    fn route(&self, event: &Event) -> Vec<FileEvent> {
        let Some(op) = FileOp::from_kind(&event.kind) else {
            return Vec::new();
        };
        let mut routed: Vec<FileEvent> = Vec::new();
        let mut push = |path: &PathBuf, op: FileOp| {
            if !routed.iter().any(|e| &e.path == path && e.op == op) {
                routed.push(FileEvent {
                    path: path.clone(),
                    op,
                });
            }
        };
        for path in &event.paths {
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            let Some(files) = self.lookup_dir(dir) else {
                continue;
            };
            if let Some(tracked) = files.get(name) {
                push(tracked, op);
            } else if name.to_string_lossy().starts_with("..") {
                // Kubernetes atomic writer: files are symlinks through
                // `..data`, which is swapped on every update.
                for tracked in files.values() {
                    push(tracked, FileOp::Write);
                }
            }
        }
        routed
    }
}

/// Sending half of a manual event source.
#[derive(Debug, Clone)]
pub struct EventSender {
    events: mpsc::Sender<FileEvent>,
    errors: mpsc::Sender<notify::Error>,
}

impl EventSender {
    /// Returns false once the source has been closed.
    pub async fn send(&self, path: impl Into<PathBuf>, op: FileOp) -> bool {
        let event = FileEvent {
            path: path.into(),
            op,
        };
        self.events.send(event).await.is_ok()
    }

    pub async fn send_error(&self, error: notify::Error) -> bool {
        self.errors.send(error).await.is_ok()
    }

    /// True once the receiving source has been closed or dropped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed() && self.errors.is_closed()
    }
}

/// Ordered stream of [`FileEvent`]s plus a separate stream of watcher errors.
pub struct FsWatcher {
    events: mpsc::Receiver<FileEvent>,
    errors: mpsc::Receiver<notify::Error>,
    /// Held to keep the OS watch alive; `None` for manual sources.
    backend: Option<RecommendedWatcher>,
    closed: bool,
}

impl FsWatcher {
    /// Watch the given files, which do not need to exist yet.
    ///
    /// Fails if the parent directory of any file is missing.
    pub fn new<P: AsRef<Path>>(files: &[P], buffer: usize) -> Result<Self> {
        let mut routes = Routes::default();
        for file in files {
            let file = file.as_ref();
            let Some(name) = file.file_name() else {
                warn!(path = %file.display(), "not a file path, ignoring");
                continue;
            };
            let dir = match file.parent() {
                Some(d) if !d.as_os_str().is_empty() => d,
                _ => Path::new("."),
            };
            let dir = std::fs::canonicalize(dir).map_err(|e| {
                notify::Error::io(e).add_path(dir.to_path_buf())
            })?;
            routes
                .dirs
                .entry(dir)
                .or_default()
                .insert(name.to_os_string(), file.to_path_buf());
        }
        let routes = Arc::new(routes);

        let (events_tx, events) = mpsc::channel(buffer.max(1));
        let (errors_tx, errors) = mpsc::channel(buffer.max(1));
        let handler_routes = Arc::clone(&routes);
        let mut backend = notify::recommended_watcher(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for routed in handler_routes.route(&event) {
                        // Runs on the notify thread, never inside the runtime.
                        if events_tx.blocking_send(routed).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = errors_tx.blocking_send(e);
                }
            },
        )?;

        for dir in routes.dirs.keys() {
            backend.watch(dir, RecursiveMode::NonRecursive)?;
            debug!(path = %dir.display(), "watching directory");
        }
        info!(files = files.len(), dirs = routes.dirs.len(), "fswatcher started");

        Ok(Self {
            events,
            errors,
            backend: Some(backend),
            closed: false,
        })
    }

    /// An event source without an OS backend, fed through the returned sender.
    pub fn manual(buffer: usize) -> (EventSender, Self) {
        let (events_tx, events) = mpsc::channel(buffer.max(1));
        let (errors_tx, errors) = mpsc::channel(buffer.max(1));
        let sender = EventSender {
            events: events_tx,
            errors: errors_tx,
        };
        let source = Self {
            events,
            errors,
            backend: None,
            closed: false,
        };
        (sender, source)
    }

    pub async fn next_event(&mut self) -> Option<FileEvent> {
        self.events.recv().await
    }

    pub async fn next_error(&mut self) -> Option<notify::Error> {
        self.errors.recv().await
    }

    /// Both receivers at once, for multiplexing in a single `select!`.
    pub(crate) fn streams(
        &mut self,
    ) -> (&mut mpsc::Receiver<FileEvent>, &mut mpsc::Receiver<notify::Error>) {
        (&mut self.events, &mut self.errors)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the OS watch and close both streams. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Close the channels first so a notify thread blocked on a full
        // queue is released before the backend is torn down.
        self.events.close();
        self.errors.close();
        self.backend.take();
        debug!("fswatcher closed");
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsWatcher")
            .field("os_backend", &self.backend.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}
