//! `russh`-backed SFTP session client and its connection factory
//!
//! [`SftpClient`] adapts a `russh_sftp::client::SftpSession` to the
//! [`IRemoteClient`] port. [`SftpConnector`] is the
//! [`IConnectionFactory`] the dispatcher pool calls to open one session
//! per worker: TCP + SSH handshake, authentication, the `sftp`
//! subsystem, then a destination-base existence check.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{AuthResult, Handler};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use driftsync_core::domain::errors::BackendError;
use driftsync_core::ports::{IRemoteClient, RemoteEntry};

use crate::uri::SftpUri;

// ---------------------------------------------------------------------------
// SSH transport handler
// ---------------------------------------------------------------------------

struct SshHandler;

impl Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // TODO: optional known_hosts pinning; currently trust-on-connect.
        let fp = server_public_key.fingerprint(HashAlg::Sha256);
        debug!(fingerprint = %fp, "Accepting server host key");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn status_code(err: &SftpError) -> Option<StatusCode> {
    match err {
        SftpError::Status(status) => Some(status.status_code),
        _ => None,
    }
}

fn is_no_such_file(err: &SftpError) -> bool {
    status_code(err) == Some(StatusCode::NoSuchFile)
}

fn map_sftp(err: SftpError) -> BackendError {
    BackendError::Remote(err.to_string())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One persistent SFTP session, exclusively owned by a pool worker
pub struct SftpClient {
    handle: russh::client::Handle<SshHandler>,
    sftp: SftpSession,
}

#[async_trait]
impl IRemoteClient for SftpClient {
    async fn change_dir(&mut self, path: &str) -> Result<(), BackendError> {
        match self.sftp.metadata(path).await {
            Ok(attrs) if attrs.is_dir() => Ok(()),
            Ok(_) => Err(BackendError::Config(format!(
                "remote path '{path}' exists but is not a directory"
            ))),
            Err(err) if is_no_such_file(&err) => Err(BackendError::Config(format!(
                "remote directory '{path}' does not exist"
            ))),
            Err(err) => Err(map_sftp(err)),
        }
    }

    async fn stat(&mut self, path: &str) -> Result<Option<RemoteEntry>, BackendError> {
        match self.sftp.metadata(path).await {
            Ok(attrs) => Ok(Some(RemoteEntry {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                is_dir: attrs.is_dir(),
            })),
            Err(err) if is_no_such_file(&err) => Ok(None),
            Err(err) => Err(map_sftp(err)),
        }
    }

    async fn create_dir(&mut self, path: &str) -> Result<(), BackendError> {
        match self.sftp.create_dir(path).await {
            Ok(()) => Ok(()),
            // Generic Failure usually means the directory already exists;
            // confirm with a stat before treating it as success.
            Err(err) if status_code(&err) == Some(StatusCode::Failure) => {
                match self.sftp.metadata(path).await {
                    Ok(attrs) if attrs.is_dir() => Ok(()),
                    Ok(_) => Err(BackendError::Remote(format!(
                        "remote path '{path}' exists and is not a directory"
                    ))),
                    Err(_) => Err(map_sftp(err)),
                }
            }
            Err(err) => Err(map_sftp(err)),
        }
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), BackendError> {
        let mut reader = tokio::fs::File::open(local)
            .await
            .map_err(BackendError::from_io)?;
        let mut writer = self.sftp.create(remote).await.map_err(map_sftp)?;
        tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(BackendError::from_io)?;
        writer.shutdown().await.map_err(BackendError::from_io)?;
        Ok(())
    }

    async fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, BackendError> {
        let entries = match self.sftp.read_dir(path).await {
            Ok(entries) => entries,
            Err(err) if is_no_such_file(&err) => return Ok(Vec::new()),
            Err(err) => return Err(map_sftp(err)),
        };
        Ok(entries
            .into_iter()
            .filter(|e| e.file_name() != "." && e.file_name() != "..")
            .map(|e| RemoteEntry {
                is_dir: e.metadata().is_dir(),
                name: e.file_name(),
            })
            .collect())
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), BackendError> {
        match self.sftp.remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if is_no_such_file(&err) => Ok(()),
            Err(err) => Err(map_sftp(err)),
        }
    }

    async fn remove_dir(&mut self, path: &str) -> Result<(), BackendError> {
        match self.sftp.remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(err) if is_no_such_file(&err) => Ok(()),
            Err(err) => Err(map_sftp(err)),
        }
    }

    async fn rename(&mut self, old: &str, new: &str) -> Result<(), BackendError> {
        self.sftp.rename(old, new).await.map_err(map_sftp)
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(|err| BackendError::Remote(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Credential source for an SFTP destination
#[derive(Debug, Clone)]
pub enum SftpAuth {
    Password(String),
    /// Path to a private key file.
    Key(PathBuf),
}

/// Opens and closes [`SftpClient`] sessions for the dispatcher pool
///
/// Authentication and handshake failures map to
/// [`BackendError::Connect`] and are never retried by the retry policy;
/// a missing destination base maps to [`BackendError::Config`].
pub struct SftpConnector {
    uri: SftpUri,
    auth: SftpAuth,
}

impl SftpConnector {
    pub fn new(uri: SftpUri, auth: SftpAuth) -> Self {
        Self { uri, auth }
    }

    async fn open_session(&self) -> Result<SftpClient, BackendError> {
        let connect_err =
            |err: russh::Error| BackendError::Connect(format!("{}: {err}", self.uri));

        let config = Arc::new(russh::client::Config::default());
        let mut handle = russh::client::connect(config, self.uri.addr(), SshHandler)
            .await
            .map_err(connect_err)?;

        let auth_result = match &self.auth {
            SftpAuth::Password(password) => handle
                .authenticate_password(&self.uri.user, password)
                .await
                .map_err(connect_err)?,
            SftpAuth::Key(path) => {
                let key = russh::keys::load_secret_key(path, None).map_err(|err| {
                    BackendError::Config(format!(
                        "cannot load ssh key '{}': {err}",
                        path.display()
                    ))
                })?;
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(connect_err)?
                    .flatten();
                handle
                    .authenticate_publickey(
                        &self.uri.user,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                    )
                    .await
                    .map_err(connect_err)?
            }
        };

        if let AuthResult::Failure {
            remaining_methods, ..
        } = auth_result
        {
            return Err(BackendError::Connect(format!(
                "{}: authentication failed, remaining methods: {remaining_methods:?}",
                self.uri
            )));
        }

        let channel = handle.channel_open_session().await.map_err(connect_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(connect_err)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| BackendError::Connect(format!("{}: {err}", self.uri)))?;

        let mut client = SftpClient { handle, sftp };
        client.change_dir(&self.uri.base).await?;

        info!(destination = %self.uri, "SFTP session established");
        Ok(client)
    }
}

#[async_trait]
impl driftsync_dispatch::IConnectionFactory<SftpClient> for SftpConnector {
    async fn connect(&self) -> Result<SftpClient, BackendError> {
        self.open_session().await
    }

    async fn disconnect(&self, mut conn: SftpClient) -> Result<(), BackendError> {
        conn.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use russh_sftp::protocol::Status;

    use super::*;

    fn status_err(code: StatusCode) -> SftpError {
        SftpError::Status(Status {
            id: 0,
            status_code: code,
            error_message: String::new(),
            language_tag: "en-US".to_string(),
        })
    }

    #[test]
    fn no_such_file_is_detected() {
        assert!(is_no_such_file(&status_err(StatusCode::NoSuchFile)));
        assert!(!is_no_such_file(&status_err(StatusCode::PermissionDenied)));
    }

    #[test]
    fn protocol_errors_map_to_remote() {
        let mapped = map_sftp(status_err(StatusCode::PermissionDenied));
        assert!(matches!(mapped, BackendError::Remote(_)));
        assert!(!mapped.is_transient());
    }
}
