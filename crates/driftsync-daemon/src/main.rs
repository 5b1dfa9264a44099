//! Driftsync daemon - background filesystem mirroring service
//!
//! For every configured mapping the daemon watches the source tree and
//! mirrors each change to the mapping's destination, which is either a
//! local directory or an `sftp://` URI. Mappings run fully independent
//! of each other: one watcher, one router and one backend per mapping.
//!
//! # Architecture
//!
//! ```text
//! main ──┬── mapping task 0: FileWatcher → EventRouter → backend
//!        ├── mapping task 1: ...
//!        └── signal handler → CancellationToken
//! ```
//!
//! Shutdown is graceful: on SIGTERM/SIGINT every mapping task stops
//! consuming events, then asks its backend to drain queued work and
//! close its connections.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use driftsync_core::config::{Config, MappingConfig};
use driftsync_core::ports::ISyncBackend;
use driftsync_dispatch::RetryPolicy;
use driftsync_local::LocalBackend;
use driftsync_sftp::{RemoteBackend, SftpAuth, SftpConnector, SftpUri};
use driftsync_watch::{EventRouter, ExclusionFilter, FileWatcher};

/// Builds the backend a mapping's destination selects.
///
/// An `sftp://` destination gets a pooled [`RemoteBackend`]; anything
/// else is treated as a local directory path. `source_base` is the
/// directory relative paths resolve against: the source itself, or its
/// parent when the source is a single file.
fn build_backend(
    mapping: &MappingConfig,
    source_base: &Path,
    config: &Config,
) -> Result<Arc<dyn ISyncBackend>> {
    let retry = RetryPolicy::from(&config.dispatch);

    if mapping.is_remote() {
        let uri = SftpUri::parse(&mapping.destination)?;
        let auth = match (&mapping.ssh_key, &mapping.ssh_password, &uri.password) {
            (Some(key), _, _) => SftpAuth::Key(key.clone()),
            (None, Some(password), _) => SftpAuth::Password(password.clone()),
            (None, None, Some(password)) => SftpAuth::Password(password.clone()),
            (None, None, None) => bail!(
                "mapping '{}' needs ssh_key or ssh_password for destination {}",
                mapping.source.display(),
                uri
            ),
        };

        let base = uri.base.clone();
        let connector = Arc::new(SftpConnector::new(uri, auth));
        Ok(Arc::new(RemoteBackend::new(
            connector,
            source_base,
            base,
            config.dispatch.workers,
            retry,
        )))
    } else {
        Ok(Arc::new(LocalBackend::new(
            source_base,
            &mapping.destination,
            retry,
        )))
    }
}

/// The directory a mapping actually watches: the source itself, or its
/// parent when the source is a single file.
fn watch_base(source: &Path, source_is_file: bool) -> PathBuf {
    if source_is_file {
        source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        source.to_path_buf()
    }
}

/// Watches one mapping's source tree (or single file, via its parent
/// directory) and mirrors its events until the shutdown token fires,
/// then drains the backend.
async fn run_mapping(
    mapping: MappingConfig,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let source_is_file = tokio::fs::metadata(&mapping.source)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    let base = watch_base(&mapping.source, source_is_file);

    let backend = build_backend(&mapping, &base, &config)?;
    let filter = ExclusionFilter::from_config(mapping.exclude.as_deref()).with_context(|| {
        format!(
            "invalid exclude pattern for mapping '{}'",
            mapping.source.display()
        )
    })?;

    let (mut watcher, mut events) = FileWatcher::new()?;
    watcher.watch(&base)?;

    let mut router = if source_is_file {
        EventRouter::for_file(&mapping.source, backend.clone(), filter)
    } else {
        EventRouter::new(&mapping.source, backend.clone(), filter)
    };

    info!(
        source = %mapping.source.display(),
        destination = %mapping.destination,
        "Mapping active"
    );

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => router.route(event).await,
                    None => {
                        error!(source = %mapping.source.display(), "Watcher channel closed");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!(source = %mapping.source.display(), "Shutdown requested");
                break;
            }
        }
    }

    if let Err(err) = watcher.unwatch(&base) {
        // The watch may already be gone if the source was deleted.
        info!(error = %err, "Unwatch failed during shutdown");
    }
    backend
        .shutdown()
        .await
        .context("backend shutdown failed")?;

    info!(source = %mapping.source.display(), "Mapping stopped");
    Ok(())
}

/// Waits for SIGTERM or SIGINT and cancels the token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)
        .with_context(|| format!("cannot load configuration from {}", config_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "Driftsync daemon starting (driftsyncd)");

    let errors = config.validate();
    if !errors.is_empty() {
        for err in &errors {
            error!(field = %err.field, message = %err.message, "Invalid configuration");
        }
        bail!("configuration is invalid ({} errors)", errors.len());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let mut tasks = Vec::new();
    for mapping in config.mappings.clone() {
        let config = config.clone();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(run_mapping(mapping, config, token)));
    }

    let mut failed = false;
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %format!("{err:#}"), "Mapping task failed");
                failed = true;
            }
            Err(err) => {
                error!(error = %err, "Mapping task panicked");
                failed = true;
            }
        }
    }

    if failed {
        bail!("one or more mappings failed");
    }
    info!("Driftsync daemon shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_mapping(dst: &str) -> MappingConfig {
        MappingConfig {
            source: "/src".into(),
            destination: dst.to_string(),
            exclude: None,
            ssh_key: None,
            ssh_password: None,
        }
    }

    #[test]
    fn local_destination_selects_local_backend() {
        let config = Config::default();
        let backend = build_backend(&local_mapping("/mnt/mirror"), Path::new("/src"), &config);
        assert!(backend.is_ok());
    }

    #[test]
    fn remote_destination_without_credentials_is_rejected() {
        let config = Config::default();
        let mapping = local_mapping("sftp://user@host/base");
        assert!(build_backend(&mapping, Path::new("/src"), &config).is_err());
    }

    #[test]
    fn remote_destination_with_password_is_accepted() {
        let config = Config::default();
        let mut mapping = local_mapping("sftp://user@host/base");
        mapping.ssh_password = Some("secret".to_string());
        assert!(build_backend(&mapping, Path::new("/src"), &config).is_ok());
    }

    #[test]
    fn malformed_remote_uri_is_rejected() {
        let config = Config::default();
        let mut mapping = local_mapping("sftp://host-without-user/base");
        mapping.ssh_password = Some("secret".to_string());
        assert!(build_backend(&mapping, Path::new("/src"), &config).is_err());
    }

    #[test]
    fn file_sources_are_watched_through_their_parent() {
        assert_eq!(
            watch_base(Path::new("/srv/data/notes.txt"), true),
            PathBuf::from("/srv/data")
        );
        assert_eq!(
            watch_base(Path::new("/srv/data"), false),
            PathBuf::from("/srv/data")
        );
    }

    #[test]
    fn cancellation_token_propagates_to_children() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
