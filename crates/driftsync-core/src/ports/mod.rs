//! Port definitions (trait interfaces for adapters)
//!
//! Ports decouple the dispatch engine and the event router from concrete
//! backend implementations:
//!
//! - [`sync_backend::ISyncBackend`] - the six-operation mirror contract
//! - [`remote_client::IRemoteClient`] - primitives a remote-protocol
//!   client must provide to back a `RemoteBackend`

pub mod remote_client;
pub mod sync_backend;

pub use remote_client::{IRemoteClient, RemoteEntry};
pub use sync_backend::ISyncBackend;
