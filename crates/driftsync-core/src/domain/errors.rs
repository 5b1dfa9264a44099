//! Error taxonomy for mirror operations
//!
//! The important distinction here is *transient* versus everything else:
//! a transient I/O error (file locked by a writer, brief network
//! interruption) is eligible for retry by the dispatch engine's
//! `RetryPolicy`, while configuration and lifecycle errors surface
//! immediately. Absence of a source or target is deliberately *not* an
//! error anywhere in this taxonomy - backends treat it as a successful
//! no-op.

use std::io::ErrorKind;

use thiserror::Error;

/// Errors in domain-type construction (path validation)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Path is absolute where a relative path is required
    #[error("Path must be relative: {0}")]
    AbsolutePath(String),

    /// Path escapes its base directory via `..` components
    #[error("Path traversal not allowed: {0}")]
    PathTraversal(String),

    /// Path is empty or reduces to nothing after normalization
    #[error("Empty path")]
    EmptyPath,
}

/// Errors that can occur while executing a mirror operation
///
/// ## Classification
///
/// - [`Transient`](BackendError::Transient) is the only retryable class.
/// - [`Config`](BackendError::Config) and [`Connect`](BackendError::Connect)
///   are fatal and reported immediately; a fresh connection attempt is
///   required rather than a blind retry.
/// - [`QueueClosed`](BackendError::QueueClosed) signals submission after
///   shutdown - a lifecycle error in the caller.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Recoverable I/O failure (lock contention, brief network hiccup)
    #[error("Transient I/O error: {0}")]
    Transient(std::io::Error),

    /// Non-recoverable I/O failure
    #[error("IO error: {0}")]
    Io(std::io::Error),

    /// Invalid configuration (bad destination URI, remote base path absent)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection establishment or authentication failure
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Submission attempted after the dispatcher was shut down
    #[error("Operation queue is closed")]
    QueueClosed,

    /// Non-transient remote protocol failure
    #[error("Remote error: {0}")]
    Remote(String),

    /// A domain-level validation error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl BackendError {
    /// Returns true if this error is eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    /// Classifies a raw I/O error into `Transient` or `Io`.
    ///
    /// Lock contention surfaces as `WouldBlock` on Unix and as
    /// `PermissionDenied` for Windows sharing violations; both are
    /// expected while another process is still writing the file.
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::PermissionDenied => BackendError::Transient(err),
            _ => BackendError::Io(err),
        }
    }
}
