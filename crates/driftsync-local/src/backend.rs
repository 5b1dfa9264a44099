//! `LocalBackend` implementation of the mirror contract

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use driftsync_core::domain::errors::BackendError;
use driftsync_core::domain::relpath::RelPath;
use driftsync_core::ports::ISyncBackend;
use driftsync_dispatch::RetryPolicy;

/// Mirrors relative-path operations from a source base into a
/// destination base on the local filesystem
///
/// Both bases are immutable after construction; the backend holds no
/// other state and is freely shareable across tasks.
pub struct LocalBackend {
    source_base: PathBuf,
    dest_base: PathBuf,
    retry: RetryPolicy,
}

impl LocalBackend {
    pub fn new(
        source_base: impl Into<PathBuf>,
        dest_base: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source_base: source_base.into(),
            dest_base: dest_base.into(),
            retry,
        }
    }

    fn source(&self, path: &RelPath) -> PathBuf {
        path.to_native(&self.source_base)
    }

    fn dest(&self, path: &RelPath) -> PathBuf {
        path.to_native(&self.dest_base)
    }

    /// Creates the parent directory chain of a destination path.
    async fn ensure_parent(&self, dst: &Path) -> Result<(), BackendError> {
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BackendError::from_io)?;
        }
        Ok(())
    }

    /// Copies one file with retry; a source vanishing mid-operation is a
    /// successful no-op.
    async fn copy_one(&self, src: PathBuf, dst: PathBuf) -> Result<(), BackendError> {
        self.ensure_parent(&dst).await?;
        let result = self
            .retry
            .run(|| {
                let src = src.clone();
                let dst = dst.clone();
                async move {
                    tokio::fs::copy(&src, &dst)
                        .await
                        .map(|_| ())
                        .map_err(BackendError::from_io)
                }
            })
            .await;
        absent_is_ok(result)
    }
}

#[async_trait]
impl ISyncBackend for LocalBackend {
    async fn copy_file(&self, src: &RelPath, dst: &RelPath) -> Result<(), BackendError> {
        let src_native = self.source(src);
        if !path_exists(&src_native).await? {
            debug!(path = %src, "Copy source already gone, skipping");
            return Ok(());
        }

        self.copy_one(src_native, self.dest(dst)).await?;
        info!(src = %src, dst = %dst, "Copied file");
        Ok(())
    }

    async fn copy_folder(&self, src: &RelPath, dst: &RelPath) -> Result<(), BackendError> {
        let src_native = self.source(src);
        if !path_exists(&src_native).await? {
            debug!(path = %src, "Copy source folder already gone, skipping");
            return Ok(());
        }

        let files = enumerate_files(src_native.clone()).await?;
        let copies = files.iter().map(|rel| {
            let from = rel.to_native(&src_native);
            let to = rel.to_native(&self.dest(dst));
            self.copy_one(from, to)
        });
        futures::future::try_join_all(copies).await?;

        // An empty source folder still mirrors as an empty directory.
        if files.is_empty() {
            tokio::fs::create_dir_all(self.dest(dst))
                .await
                .map_err(BackendError::from_io)?;
        }

        info!(src = %src, dst = %dst, files = files.len(), "Copied folder");
        Ok(())
    }

    async fn move_file(&self, old: &RelPath, new: &RelPath) -> Result<(), BackendError> {
        let old_native = self.dest(old);
        if !path_exists(&old_native).await? {
            debug!(path = %old, "Move source already gone, skipping");
            return Ok(());
        }
        let new_native = self.dest(new);
        self.ensure_parent(&new_native).await?;

        let renamed = self
            .retry
            .run(|| {
                let from = old_native.clone();
                let to = new_native.clone();
                async move {
                    tokio::fs::rename(&from, &to)
                        .await
                        .map_err(BackendError::from_io)
                }
            })
            .await;

        match absent_is_ok(renamed) {
            Ok(()) => {}
            // Rename can fail across filesystem boundaries; fall back to
            // copy + delete for files.
            Err(_) => {
                self.copy_one(old_native.clone(), new_native).await?;
                let removed = tokio::fs::remove_file(&old_native)
                    .await
                    .map_err(BackendError::from_io);
                absent_is_ok(removed)?;
            }
        }

        info!(old = %old, new = %new, "Moved file");
        Ok(())
    }

    async fn move_folder(&self, old: &RelPath, new: &RelPath) -> Result<(), BackendError> {
        let old_native = self.dest(old);
        if !path_exists(&old_native).await? {
            debug!(path = %old, "Move source folder already gone, skipping");
            return Ok(());
        }
        let new_native = self.dest(new);
        self.ensure_parent(&new_native).await?;

        let renamed = self
            .retry
            .run(|| {
                let from = old_native.clone();
                let to = new_native.clone();
                async move {
                    tokio::fs::rename(&from, &to)
                        .await
                        .map_err(BackendError::from_io)
                }
            })
            .await;
        absent_is_ok(renamed)?;

        info!(old = %old, new = %new, "Moved folder");
        Ok(())
    }

    async fn delete_file(&self, path: &RelPath) -> Result<(), BackendError> {
        let native = self.dest(path);
        let removed = self
            .retry
            .run(|| {
                let target = native.clone();
                async move {
                    tokio::fs::remove_file(&target)
                        .await
                        .map_err(BackendError::from_io)
                }
            })
            .await;
        absent_is_ok(removed)?;

        info!(path = %path, "Deleted file");
        Ok(())
    }

    async fn delete_folder(&self, path: &RelPath) -> Result<(), BackendError> {
        let native = self.dest(path);
        let removed = self
            .retry
            .run(|| {
                let target = native.clone();
                async move {
                    tokio::fs::remove_dir_all(&target)
                        .await
                        .map_err(BackendError::from_io)
                }
            })
            .await;
        absent_is_ok(removed)?;

        info!(path = %path, "Deleted folder");
        Ok(())
    }
}

/// Existence check that distinguishes "absent" from "unreadable".
async fn path_exists(path: &Path) -> Result<bool, BackendError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(BackendError::from_io)
}

/// Collapses a not-found failure into a successful no-op.
fn absent_is_ok(result: Result<(), BackendError>) -> Result<(), BackendError> {
    match result {
        Err(BackendError::Io(err) | BackendError::Transient(err))
            if err.kind() == io::ErrorKind::NotFound =>
        {
            Ok(())
        }
        other => other,
    }
}

/// Walks a directory on the blocking pool and returns the relative paths
/// of every contained file.
async fn enumerate_files(root: PathBuf) -> Result<Vec<RelPath>, BackendError> {
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = entry.map_err(|err| match err.into_io_error() {
                Some(io_err) => BackendError::from_io(io_err),
                None => BackendError::Io(io::Error::other("walk cycle detected")),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rel) = RelPath::relative_to(&root, entry.path()) {
                files.push(rel);
            }
        }
        Ok(files)
    })
    .await
    .map_err(|err| BackendError::Io(io::Error::other(err)))?
}
