//! Event-to-operation routing
//!
//! Maps each [`ChangeEvent`] to exactly one backend operation: file
//! creation or modification becomes `copy_file`, directory creation
//! `copy_folder`, deletion `delete_file`/`delete_folder`, rename
//! `move_file`/`move_folder`.
//!
//! A deleted path can no longer be classified as file or directory, so
//! the router keeps a set of directories it has seen and consults it
//! when the OS event does not carry the classification itself.
//!
//! A mapping source may also be a single file. The watch then covers
//! the parent directory, and [`EventRouter::for_file`] restricts
//! routing to events that name exactly that file.
//!
//! Backend failures are logged and swallowed here: one failed mirror
//! operation must never stop the event stream.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, warn};
use walkdir::WalkDir;

use driftsync_core::domain::relpath::RelPath;
use driftsync_core::ports::ISyncBackend;

use crate::filter::ExclusionFilter;
use crate::watcher::{ChangeEvent, PathKind};

/// Routes change events for one mapping to its backend
pub struct EventRouter {
    source_base: PathBuf,
    backend: Arc<dyn ISyncBackend>,
    filter: ExclusionFilter,
    /// Directories observed under the source base, for classifying
    /// deletions after the path is gone.
    dirs: HashSet<PathBuf>,
    /// Set for single-file mappings: only events naming this file,
    /// directly under the source base, are routed.
    only: Option<OsString>,
}

impl EventRouter {
    /// Creates a router, seeding the directory set from the current
    /// contents of the source tree.
    pub fn new(
        source_base: impl Into<PathBuf>,
        backend: Arc<dyn ISyncBackend>,
        filter: ExclusionFilter,
    ) -> Self {
        let source_base = source_base.into();
        let mut dirs = HashSet::new();
        for entry in WalkDir::new(&source_base).into_iter().flatten() {
            if entry.file_type().is_dir() {
                dirs.insert(entry.path().to_path_buf());
            }
        }

        Self {
            source_base,
            backend,
            filter,
            dirs,
            only: None,
        }
    }

    /// Creates a router for a mapping whose source is a single file:
    /// the file's parent directory becomes the base, and events for any
    /// other path are ignored.
    pub fn for_file(
        source_file: impl Into<PathBuf>,
        backend: Arc<dyn ISyncBackend>,
        filter: ExclusionFilter,
    ) -> Self {
        let source_file = source_file.into();
        let source_base = source_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let only = source_file.file_name().map(|name| name.to_os_string());

        Self {
            source_base,
            backend,
            filter,
            dirs: HashSet::new(),
            only,
        }
    }

    /// Handles one change event end to end.
    ///
    /// The returned future completes when the backend operation has
    /// finished; the caller decides whether to await it inline or run
    /// it detached. Errors are logged, never returned.
    pub async fn route(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Created { path, kind } => self.on_created(&path, kind).await,
            ChangeEvent::Modified { path } => self.on_modified(&path).await,
            ChangeEvent::Deleted { path, kind } => self.on_deleted(&path, kind).await,
            ChangeEvent::Renamed { old, new } => self.on_renamed(&old, &new).await,
        }
    }

    fn rel(&self, path: &Path) -> Option<RelPath> {
        let rel = RelPath::relative_to(&self.source_base, path)?;
        if let Some(only) = &self.only {
            if rel.parent().is_some() || path.file_name() != Some(only.as_os_str()) {
                return None;
            }
        }
        if self.filter.is_excluded(&rel) {
            return None;
        }
        Some(rel)
    }

    async fn on_created(&mut self, path: &Path, kind: PathKind) {
        let Some(rel) = self.rel(path) else { return };

        let is_dir = match kind {
            PathKind::Directory => true,
            PathKind::File => false,
            PathKind::Unknown => is_dir_on_disk(path).await,
        };

        if is_dir {
            self.dirs.insert(path.to_path_buf());
            log_outcome("copy_folder", &rel, self.backend.copy_folder(&rel, &rel).await);
        } else {
            log_outcome("copy_file", &rel, self.backend.copy_file(&rel, &rel).await);
        }
    }

    async fn on_modified(&mut self, path: &Path) {
        let Some(rel) = self.rel(path) else { return };

        // Directory modifications carry no content; the contained files
        // produce their own events.
        if self.dirs.contains(path) {
            return;
        }
        if is_dir_on_disk(path).await {
            self.dirs.insert(path.to_path_buf());
            return;
        }

        log_outcome("copy_file", &rel, self.backend.copy_file(&rel, &rel).await);
    }

    async fn on_deleted(&mut self, path: &Path, kind: PathKind) {
        let Some(rel) = self.rel(path) else { return };

        let is_dir = match kind {
            PathKind::Directory => true,
            PathKind::File => false,
            PathKind::Unknown => self.dirs.contains(path),
        };

        if is_dir {
            self.forget_subtree(path);
            log_outcome("delete_folder", &rel, self.backend.delete_folder(&rel).await);
        } else {
            log_outcome("delete_file", &rel, self.backend.delete_file(&rel).await);
        }
    }

    async fn on_renamed(&mut self, old: &Path, new: &Path) {
        let old_rel = self.rel(old);
        let new_rel = self.rel(new);

        match (old_rel, new_rel) {
            (Some(old_rel), Some(new_rel)) => {
                let is_dir = self.dirs.contains(old) || is_dir_on_disk(new).await;
                if is_dir {
                    self.rekey_subtree(old, new);
                    log_outcome(
                        "move_folder",
                        &new_rel,
                        self.backend.move_folder(&old_rel, &new_rel).await,
                    );
                } else {
                    log_outcome(
                        "move_file",
                        &new_rel,
                        self.backend.move_file(&old_rel, &new_rel).await,
                    );
                }
            }
            // Moved into the watched tree: mirror as a creation.
            (None, Some(_)) => self.on_created(new, PathKind::Unknown).await,
            // Moved out of the watched tree: mirror as a deletion.
            (Some(_), None) => {
                let kind = if self.dirs.contains(old) {
                    PathKind::Directory
                } else {
                    PathKind::File
                };
                self.on_deleted(old, kind).await;
            }
            (None, None) => {
                debug!(
                    old = %old.display(),
                    new = %new.display(),
                    "Rename outside watched tree, ignoring"
                );
            }
        }
    }

    fn forget_subtree(&mut self, root: &Path) {
        self.dirs.retain(|p| !p.starts_with(root));
    }

    fn rekey_subtree(&mut self, old: &Path, new: &Path) {
        let moved: Vec<PathBuf> = self
            .dirs
            .iter()
            .filter(|p| p.starts_with(old))
            .cloned()
            .collect();
        for path in moved {
            self.dirs.remove(&path);
            if let Ok(suffix) = path.strip_prefix(old) {
                self.dirs.insert(new.join(suffix));
            }
        }
        self.dirs.insert(new.to_path_buf());
    }
}

async fn is_dir_on_disk(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_dir(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Cannot classify path, assuming file");
            false
        }
    }
}

fn log_outcome(
    op: &str,
    path: &RelPath,
    result: Result<(), driftsync_core::domain::errors::BackendError>,
) {
    if let Err(err) = result {
        error!(op, path = %path, error = %err, "Mirror operation failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use driftsync_dispatch::RetryPolicy;
    use driftsync_local::LocalBackend;

    use super::*;

    struct Setup {
        src: tempfile::TempDir,
        dst: tempfile::TempDir,
        router: EventRouter,
    }

    fn setup(exclude: Option<&str>) -> Setup {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::new(
            src.path(),
            dst.path(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let filter = ExclusionFilter::from_config(exclude).unwrap();
        let router = EventRouter::new(src.path(), backend, filter);
        Setup { src, dst, router }
    }

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn created_file_event_mirrors_the_file() {
        let mut s = setup(None);
        write(&s.src.path().join("a.txt"), "X");

        s.router
            .route(ChangeEvent::Created {
                path: s.src.path().join("a.txt"),
                kind: PathKind::File,
            })
            .await;

        assert_eq!(
            std::fs::read_to_string(s.dst.path().join("a.txt")).unwrap(),
            "X"
        );
    }

    #[tokio::test]
    async fn created_directory_event_mirrors_recursively() {
        let mut s = setup(None);
        write(&s.src.path().join("sub/f1.txt"), "1");
        write(&s.src.path().join("sub/deep/f2.txt"), "2");

        s.router
            .route(ChangeEvent::Created {
                path: s.src.path().join("sub"),
                kind: PathKind::Directory,
            })
            .await;

        assert!(s.dst.path().join("sub/f1.txt").exists());
        assert!(s.dst.path().join("sub/deep/f2.txt").exists());
    }

    #[tokio::test]
    async fn modified_file_event_recopies_content() {
        let mut s = setup(None);
        write(&s.src.path().join("a.txt"), "v1");
        write(&s.dst.path().join("a.txt"), "v0");

        s.router
            .route(ChangeEvent::Modified {
                path: s.src.path().join("a.txt"),
            })
            .await;

        assert_eq!(
            std::fs::read_to_string(s.dst.path().join("a.txt")).unwrap(),
            "v1"
        );
    }

    #[tokio::test]
    async fn deleted_directory_is_classified_from_the_dir_set() {
        let mut s = setup(None);
        write(&s.src.path().join("gone/f.txt"), "x");

        s.router
            .route(ChangeEvent::Created {
                path: s.src.path().join("gone"),
                kind: PathKind::Directory,
            })
            .await;
        assert!(s.dst.path().join("gone/f.txt").exists());

        // Source is removed before the event is handled, like a real
        // deletion; kind is Unknown so the dir set must decide.
        std::fs::remove_dir_all(s.src.path().join("gone")).unwrap();
        s.router
            .route(ChangeEvent::Deleted {
                path: s.src.path().join("gone"),
                kind: PathKind::Unknown,
            })
            .await;

        assert!(!s.dst.path().join("gone").exists());
    }

    #[tokio::test]
    async fn rename_event_moves_the_destination_file() {
        let mut s = setup(None);
        write(&s.src.path().join("new-name.txt"), "body");
        write(&s.dst.path().join("old-name.txt"), "body");

        s.router
            .route(ChangeEvent::Renamed {
                old: s.src.path().join("old-name.txt"),
                new: s.src.path().join("new-name.txt"),
            })
            .await;

        assert!(!s.dst.path().join("old-name.txt").exists());
        assert!(s.dst.path().join("new-name.txt").exists());
    }

    #[tokio::test]
    async fn excluded_paths_are_skipped() {
        let mut s = setup(Some("*.tmp"));
        write(&s.src.path().join("a.tmp"), "scratch");

        s.router
            .route(ChangeEvent::Created {
                path: s.src.path().join("a.tmp"),
                kind: PathKind::File,
            })
            .await;

        assert!(!s.dst.path().join("a.tmp").exists());
    }

    #[tokio::test]
    async fn single_file_mapping_mirrors_modifications() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(&src.path().join("watched.txt"), "v1");

        let backend = Arc::new(LocalBackend::new(
            src.path(),
            dst.path(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let mut router = EventRouter::for_file(
            src.path().join("watched.txt"),
            backend,
            ExclusionFilter::default(),
        );

        router
            .route(ChangeEvent::Modified {
                path: src.path().join("watched.txt"),
            })
            .await;

        assert_eq!(
            std::fs::read_to_string(dst.path().join("watched.txt")).unwrap(),
            "v1"
        );
    }

    #[tokio::test]
    async fn single_file_mapping_ignores_sibling_events() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(&src.path().join("watched.txt"), "v1");
        write(&src.path().join("other.txt"), "noise");
        write(&src.path().join("sub/watched.txt"), "nested noise");

        let backend = Arc::new(LocalBackend::new(
            src.path(),
            dst.path(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let mut router = EventRouter::for_file(
            src.path().join("watched.txt"),
            backend,
            ExclusionFilter::default(),
        );

        router
            .route(ChangeEvent::Created {
                path: src.path().join("other.txt"),
                kind: PathKind::File,
            })
            .await;
        // Same name deeper in the tree does not match either.
        router
            .route(ChangeEvent::Created {
                path: src.path().join("sub/watched.txt"),
                kind: PathKind::File,
            })
            .await;

        let mut entries = std::fs::read_dir(dst.path()).unwrap();
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn events_outside_the_source_base_are_ignored() {
        let mut s = setup(None);
        let elsewhere = tempfile::tempdir().unwrap();
        write(&elsewhere.path().join("a.txt"), "X");

        s.router
            .route(ChangeEvent::Created {
                path: elsewhere.path().join("a.txt"),
                kind: PathKind::File,
            })
            .await;

        let mut entries = std::fs::read_dir(s.dst.path()).unwrap();
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn directory_set_is_seeded_from_existing_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(&src.path().join("pre/existing.txt"), "x");
        write(&dst.path().join("pre/existing.txt"), "x");

        let backend = Arc::new(LocalBackend::new(
            src.path(),
            dst.path(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let mut router = EventRouter::new(src.path(), backend, ExclusionFilter::default());

        std::fs::remove_dir_all(src.path().join("pre")).unwrap();
        router
            .route(ChangeEvent::Deleted {
                path: src.path().join("pre"),
                kind: PathKind::Unknown,
            })
            .await;

        assert!(!dst.path().join("pre").exists());
    }
}
