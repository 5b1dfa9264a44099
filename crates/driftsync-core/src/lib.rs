//! Driftsync Core - Domain logic and port definitions
//!
//! This crate contains the shared foundation of the Driftsync mirror daemon:
//! - **Domain types** - `RelPath`, the error taxonomy (`BackendError`)
//! - **Port definitions** - Traits for adapters: `ISyncBackend`, `IRemoteClient`
//! - **Configuration** - Typed mapping list loaded from YAML
//!
//! # Architecture
//!
//! The domain module contains pure types with no I/O. Ports define trait
//! interfaces that the backend crates (`driftsync-local`, `driftsync-sftp`)
//! implement. The dispatch engine and the watcher consume only these ports,
//! never concrete backends.

pub mod config;
pub mod domain;
pub mod ports;

pub use domain::errors::{BackendError, DomainError};
pub use domain::relpath::RelPath;
pub use ports::sync_backend::ISyncBackend;
