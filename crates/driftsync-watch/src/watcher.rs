//! File watching over the OS-native notification mechanism
//!
//! Wraps the `notify` crate to monitor source directories recursively,
//! converting raw OS events into [`ChangeEvent`] values sent through an
//! mpsc channel. Events carry a file-or-directory classification where
//! the OS provides one, because a deletion can no longer be classified
//! once the path is gone.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// File-or-directory classification carried on events
///
/// `Unknown` appears on platforms whose notification API does not
/// distinguish the two; the router falls back to its own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
    Unknown,
}

/// A filesystem change event, decoupled from `notify`'s raw types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created { path: PathBuf, kind: PathKind },
    Modified { path: PathBuf },
    Deleted { path: PathBuf, kind: PathKind },
    Renamed { old: PathBuf, new: PathBuf },
}

impl ChangeEvent {
    /// Primary path of the event; the new path for renames.
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created { path, .. } => path,
            ChangeEvent::Modified { path } => path,
            ChangeEvent::Deleted { path, .. } => path,
            ChangeEvent::Renamed { new, .. } => new,
        }
    }
}

/// Watches directories recursively and emits [`ChangeEvent`]s
///
/// On Linux this uses inotify. One watcher can monitor several paths;
/// each mapping in practice gets its own watcher and channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Creates a watcher and the receiving end of its event channel.
    ///
    /// # Errors
    /// Fails when the underlying OS watcher cannot be created.
    pub fn new() -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::channel::<ChangeEvent>(1024);

        info!("Initializing file watcher");

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "Failed to send change event (receiver dropped)");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok((Self { watcher }, rx))
    }

    /// Starts watching a directory recursively.
    ///
    /// # Errors
    /// Fails when the path cannot be watched, e.g. it does not exist or
    /// the inotify watch limit is reached.
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Starting recursive watch");
        self.watcher
            .watch(path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", path.display()))
    }

    /// Stops watching a directory.
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Stopping watch");
        self.watcher
            .unwatch(path)
            .with_context(|| format!("Failed to unwatch path: {}", path.display()))
    }
}

fn create_kind(kind: notify::event::CreateKind) -> PathKind {
    match kind {
        notify::event::CreateKind::File => PathKind::File,
        notify::event::CreateKind::Folder => PathKind::Directory,
        _ => PathKind::Unknown,
    }
}

fn remove_kind(kind: notify::event::RemoveKind) -> PathKind {
    match kind {
        notify::event::RemoveKind::File => PathKind::File,
        notify::event::RemoveKind::Folder => PathKind::Directory,
        _ => PathKind::Unknown,
    }
}

/// Converts a raw `notify::Event` into a [`ChangeEvent`]
///
/// Access events and events without paths are dropped. A rename that
/// arrives with a single path is downgraded to a modification.
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(kind) => {
            let path = paths.first()?;
            debug!(path = %path.display(), "Mapped Create event");
            Some(ChangeEvent::Created {
                path: path.clone(),
                kind: create_kind(*kind),
            })
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                let old = paths[0].clone();
                let new = paths[1].clone();
                debug!(old = %old.display(), new = %new.display(), "Mapped Rename event");
                Some(ChangeEvent::Renamed { old, new })
            } else {
                let path = paths.first()?;
                debug!(path = %path.display(), "Rename with single path, treating as Modified");
                Some(ChangeEvent::Modified { path: path.clone() })
            }
        }

        EventKind::Remove(kind) => {
            let path = paths.first()?;
            debug!(path = %path.display(), "Mapped Remove event");
            Some(ChangeEvent::Deleted {
                path: path.clone(),
                kind: remove_kind(*kind),
            })
        }

        // Data, metadata and remaining name modifications all mirror the
        // same way: re-copy the file.
        EventKind::Modify(_) => {
            let path = paths.first()?;
            debug!(path = %path.display(), kind = ?event.kind, "Mapped Modify event");
            Some(ChangeEvent::Modified { path: path.clone() })
        }

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            None
        }
    }
}
