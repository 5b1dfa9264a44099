//! SFTP mirror backend
//!
//! Mirrors a watched source tree to a remote server over SFTP. The
//! backend itself is generic over any [`IRemoteClient`]; this crate
//! supplies the concrete [`SftpClient`] built on `russh` plus the
//! [`SftpConnector`] factory the dispatcher pool uses to open and close
//! sessions.
//!
//! Destinations are addressed as `sftp://user@host[:port]/base/path`
//! URIs; see [`uri::SftpUri`].
//!
//! [`IRemoteClient`]: driftsync_core::ports::IRemoteClient

pub mod backend;
pub mod client;
pub mod uri;

pub use backend::RemoteBackend;
pub use client::{SftpAuth, SftpClient, SftpConnector};
pub use uri::SftpUri;
