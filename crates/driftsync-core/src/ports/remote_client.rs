//! Remote protocol client port (driven/secondary port)
//!
//! The primitive set a protocol client library must provide to back a
//! `RemoteBackend`: change-directory, stat/exists, create-directory,
//! upload, directory listing, delete, rename and disconnect. Any client
//! satisfying these primitives can drive the same backend logic; the
//! SFTP adapter in `driftsync-sftp` is one implementation, and tests use
//! an in-memory fake.
//!
//! ## Threading
//!
//! A client is owned exclusively by one dispatcher worker for its whole
//! lifetime, so methods take `&mut self` and no internal locking is
//! required.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::errors::BackendError;

/// Metadata for one remote path or directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name (no path components)
    pub name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Port trait for a persistent remote-protocol connection
///
/// All paths are absolute remote paths in forward-slash form; the
/// backend resolves `RelPath`s against the destination base before
/// calling into the client.
#[async_trait]
pub trait IRemoteClient: Send + 'static {
    /// Verifies that `path` exists and is a directory, positioning
    /// subsequent relative operations there where the protocol has a
    /// working-directory concept.
    ///
    /// # Errors
    /// Returns [`BackendError::Config`] when the directory is absent -
    /// a missing destination base is a configuration error, reported
    /// immediately and never retried.
    async fn change_dir(&mut self, path: &str) -> Result<(), BackendError>;

    /// Stats a remote path. `Ok(None)` means the path does not exist.
    async fn stat(&mut self, path: &str) -> Result<Option<RemoteEntry>, BackendError>;

    /// Returns whether a remote path exists.
    async fn exists(&mut self, path: &str) -> Result<bool, BackendError> {
        Ok(self.stat(path).await?.is_some())
    }

    /// Creates a single directory. The parent must already exist.
    async fn create_dir(&mut self, path: &str) -> Result<(), BackendError>;

    /// Streams a local file's bytes to `remote`, overwriting any
    /// existing remote file.
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), BackendError>;

    /// Lists the entries of a remote directory, `.` and `..` excluded.
    /// An absent directory yields an empty listing.
    async fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, BackendError>;

    /// Removes a remote file. Removing an absent file is a no-op.
    async fn remove_file(&mut self, path: &str) -> Result<(), BackendError>;

    /// Removes an empty remote directory. Removing an absent directory
    /// is a no-op.
    async fn remove_dir(&mut self, path: &str) -> Result<(), BackendError>;

    /// Renames a remote path.
    async fn rename(&mut self, old: &str, new: &str) -> Result<(), BackendError>;

    /// Gracefully closes the connection.
    async fn disconnect(&mut self) -> Result<(), BackendError>;
}
