//! `RemoteBackend` implementation of the mirror contract
//!
//! All remote I/O funnels through a [`Dispatcher`] pool whose workers
//! each own one [`IRemoteClient`] session. Operations that depend on
//! one another are sequenced on the caller side: `copy_file` awaits the
//! ensure-directory item's handle before submitting the upload, so a
//! worker never blocks waiting on another worker's item and the pool
//! cannot deadlock on dependency chains.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info};
use walkdir::WalkDir;

use driftsync_core::domain::errors::BackendError;
use driftsync_core::domain::relpath::RelPath;
use driftsync_core::ports::{IRemoteClient, ISyncBackend};
use driftsync_dispatch::{Dispatcher, IConnectionFactory, RetryPolicy};

/// Mirrors relative-path operations from a local source base to a
/// remote base directory over a pooled protocol client
pub struct RemoteBackend<C> {
    source_base: PathBuf,
    remote_base: String,
    dispatcher: Dispatcher<C>,
    retry: RetryPolicy,
}

impl<C: IRemoteClient> RemoteBackend<C> {
    /// Creates a backend over `workers` pooled connections produced by
    /// `factory`. No connection is opened until the first operation.
    pub fn new(
        factory: Arc<dyn IConnectionFactory<C>>,
        source_base: impl Into<PathBuf>,
        remote_base: impl Into<String>,
        workers: usize,
        retry: RetryPolicy,
    ) -> Self {
        let remote_base = {
            let raw: String = remote_base.into();
            raw.trim_end_matches('/').to_string()
        };
        Self {
            source_base: source_base.into(),
            remote_base,
            dispatcher: Dispatcher::new(factory, workers, retry),
            retry,
        }
    }

    fn local(&self, path: &RelPath) -> PathBuf {
        path.to_native(&self.source_base)
    }

    fn remote(&self, path: &RelPath) -> String {
        path.to_remote(&self.remote_base)
    }

    /// Creates every missing segment of `dir` under the remote base,
    /// walking prefix by prefix. Awaits completion before returning so
    /// callers can submit dependent work afterwards.
    async fn ensure_remote_dir(&self, dir: Option<&RelPath>) -> Result<(), BackendError> {
        let Some(dir) = dir else { return Ok(()) };

        let mut prefixes = Vec::new();
        let mut acc = self.remote_base.clone();
        for seg in dir.segments() {
            acc = format!("{acc}/{seg}");
            prefixes.push(acc.clone());
        }

        self.dispatcher
            .submit(move |conn| {
                async move {
                    for prefix in &prefixes {
                        if !conn.exists(prefix).await? {
                            conn.create_dir(prefix).await?;
                        }
                    }
                    Ok(())
                }
                .boxed()
            })
            .await
            .wait()
            .await
    }
}

#[async_trait]
impl<C: IRemoteClient> ISyncBackend for RemoteBackend<C> {
    async fn copy_file(&self, src: &RelPath, dst: &RelPath) -> Result<(), BackendError> {
        let local = self.local(src);
        if !tokio::fs::try_exists(&local)
            .await
            .map_err(BackendError::from_io)?
        {
            debug!(path = %src, "Upload source already gone, skipping");
            return Ok(());
        }

        self.ensure_remote_dir(dst.parent().as_ref()).await?;

        let remote = self.remote(dst);
        let retry = self.retry;
        self.dispatcher
            .submit(move |conn| {
                async move {
                    retry
                        .run_with(conn, |c| {
                            let local = local.clone();
                            let remote = remote.clone();
                            async move { c.upload(&local, &remote).await }.boxed()
                        })
                        .await
                }
                .boxed()
            })
            .await
            .wait()
            .await?;

        info!(src = %src, dst = %dst, "Uploaded file");
        Ok(())
    }

    async fn copy_folder(&self, src: &RelPath, dst: &RelPath) -> Result<(), BackendError> {
        let root = self.local(src);
        if !tokio::fs::try_exists(&root)
            .await
            .map_err(BackendError::from_io)?
        {
            debug!(path = %src, "Upload source folder already gone, skipping");
            return Ok(());
        }

        let files = enumerate_files(root).await?;
        if files.is_empty() {
            self.ensure_remote_dir(Some(dst)).await?;
        } else {
            let copies = files.iter().map(|rel| async move {
                let from = src.join(rel.as_str())?;
                let to = dst.join(rel.as_str())?;
                self.copy_file(&from, &to).await
            });
            futures::future::try_join_all(copies).await?;
        }

        info!(src = %src, dst = %dst, files = files.len(), "Uploaded folder");
        Ok(())
    }

    async fn move_file(&self, old: &RelPath, new: &RelPath) -> Result<(), BackendError> {
        self.rename_remote(old, new).await?;
        info!(old = %old, new = %new, "Renamed remote file");
        Ok(())
    }

    async fn move_folder(&self, old: &RelPath, new: &RelPath) -> Result<(), BackendError> {
        self.rename_remote(old, new).await?;
        info!(old = %old, new = %new, "Renamed remote folder");
        Ok(())
    }

    async fn delete_file(&self, path: &RelPath) -> Result<(), BackendError> {
        // Deletion events are classified after the path is gone, so a
        // file-deletion can name what is actually a directory on the
        // remote side. The tree walk handles the plain-file case too.
        let remote = self.remote(path);
        self.dispatcher
            .submit(move |conn| async move { remove_remote_tree(conn, remote).await }.boxed())
            .await
            .wait()
            .await?;

        info!(path = %path, "Deleted remote file");
        Ok(())
    }

    async fn delete_folder(&self, path: &RelPath) -> Result<(), BackendError> {
        let remote = self.remote(path);
        self.dispatcher
            .submit(move |conn| async move { remove_remote_tree(conn, remote).await }.boxed())
            .await
            .wait()
            .await?;

        info!(path = %path, "Deleted remote folder");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.dispatcher.shutdown().await
    }
}

impl<C: IRemoteClient> RemoteBackend<C> {
    /// Stat-then-rename; an already-absent source is a successful no-op.
    async fn rename_remote(&self, old: &RelPath, new: &RelPath) -> Result<(), BackendError> {
        self.ensure_remote_dir(new.parent().as_ref()).await?;

        let old_remote = self.remote(old);
        let new_remote = self.remote(new);
        self.dispatcher
            .submit(move |conn| {
                async move {
                    if conn.stat(&old_remote).await?.is_none() {
                        return Ok(());
                    }
                    conn.rename(&old_remote, &new_remote).await
                }
                .boxed()
            })
            .await
            .wait()
            .await
    }
}

/// Empties then removes a remote directory tree, post-order, so plain
/// remove-directory primitives never see a non-empty directory. An
/// absent root is a successful no-op; a root that is a plain file is
/// removed directly.
async fn remove_remote_tree<C: IRemoteClient>(
    conn: &mut C,
    root: String,
) -> Result<(), BackendError> {
    match conn.stat(&root).await? {
        None => return Ok(()),
        Some(entry) if !entry.is_dir => return conn.remove_file(&root).await,
        Some(_) => {}
    }

    let mut stack: Vec<(String, bool)> = vec![(root, false)];
    while let Some((dir, visited)) = stack.pop() {
        if visited {
            conn.remove_dir(&dir).await?;
            continue;
        }
        stack.push((dir.clone(), true));
        for entry in conn.read_dir(&dir).await? {
            let child = format!("{dir}/{}", entry.name);
            if entry.is_dir {
                stack.push((child, false));
            } else {
                conn.remove_file(&child).await?;
            }
        }
    }
    Ok(())
}

/// Walks a local directory on the blocking pool and returns the relative
/// paths of every contained file.
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
