//! Mirror backend port (driven/secondary port)
//!
//! The six-operation contract every destination backend implements,
//! whether it writes to a mapped local filesystem or to a remote server
//! over a file-transfer protocol.
//!
//! ## Contract
//!
//! - Paths are [`RelPath`]s, resolved by the backend against its own
//!   immutable base directories.
//! - Folder copy is recursive, implemented by fanning out one
//!   `copy_file` per contained file.
//! - An already-absent source (for copy/move) or target (for delete) is
//!   a successful no-op, never an error. Filesystem events race with
//!   execution; by the time an operation is dispatched the path may be
//!   gone again, and that must not poison the event stream.
//! - Callers may await the returned future or run it detached via
//!   `tokio::spawn`; a failure surfaces on that operation's future only
//!   and never cancels sibling operations.

use async_trait::async_trait;

use crate::domain::errors::BackendError;
use crate::domain::relpath::RelPath;

/// Port trait for a mirror destination
#[async_trait]
pub trait ISyncBackend: Send + Sync {
    /// Copies one file from the source base to the destination base,
    /// overwriting an existing destination file.
    async fn copy_file(&self, src: &RelPath, dst: &RelPath) -> Result<(), BackendError>;

    /// Recursively copies a folder, one `copy_file` per contained file,
    /// relative paths preserved.
    async fn copy_folder(&self, src: &RelPath, dst: &RelPath) -> Result<(), BackendError>;

    /// Renames a file on the destination side.
    async fn move_file(&self, old: &RelPath, new: &RelPath) -> Result<(), BackendError>;

    /// Renames a folder on the destination side.
    async fn move_folder(&self, old: &RelPath, new: &RelPath) -> Result<(), BackendError>;

    /// Deletes a file on the destination side.
    async fn delete_file(&self, path: &RelPath) -> Result<(), BackendError>;

    /// Deletes a folder and all of its contents on the destination side.
    async fn delete_folder(&self, path: &RelPath) -> Result<(), BackendError>;

    /// Releases backend resources: drains any pending work and closes
    /// persistent connections. Further operations fail with
    /// [`BackendError::QueueClosed`] where the backend queues work.
    ///
    /// The default is a no-op for backends without persistent state.
    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
