//! Configuration module for Driftsync.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file: a list of source→destination mappings plus dispatch and logging
//! settings, with loading, validation and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for Driftsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Watched source→destination mappings.
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One watched mapping: a local source tree mirrored to a destination.
///
/// Backend selection inspects `destination`: an `sftp://user@host/base`
/// URI selects the SFTP backend, anything else is treated as a local
/// directory path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Local source directory (or single file) to watch.
    pub source: PathBuf,
    /// Destination: local directory path or `sftp://` URI.
    pub destination: String,
    /// Optional `;`-separated glob patterns; matching paths are skipped.
    #[serde(default)]
    pub exclude: Option<String>,
    /// Private key file for SFTP destinations.
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    /// Password for SFTP destinations (key auth is preferred).
    #[serde(default)]
    pub ssh_password: Option<String>,
}

/// Dispatch engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Workers (and therefore persistent connections) per backend instance.
    pub workers: usize,
    /// Maximum attempts for a transiently failing operation.
    pub retry_max: u32,
    /// Fixed backoff between retry attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            retry_max: 20,
            retry_delay_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MappingConfig {
    /// Returns true when the destination selects the SFTP backend.
    pub fn is_remote(&self) -> bool {
        self.destination
            .get(..7)
            .is_some_and(|p| p.eq_ignore_ascii_case("sftp://"))
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/driftsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("driftsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"mappings[0].source"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.mappings.is_empty() {
            errors.push(ValidationError {
                field: "mappings".into(),
                message: "at least one mapping is required".into(),
            });
        }

        for (i, mapping) in self.mappings.iter().enumerate() {
            if mapping.source.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: format!("mappings[{i}].source"),
                    message: "must not be empty".into(),
                });
            }
            if mapping.destination.is_empty() {
                errors.push(ValidationError {
                    field: format!("mappings[{i}].destination"),
                    message: "must not be empty".into(),
                });
            }
            if let Some(exclude) = &mapping.exclude {
                for pat in exclude.split(';').filter(|p| !p.is_empty()) {
                    if glob_pattern_invalid(pat) {
                        errors.push(ValidationError {
                            field: format!("mappings[{i}].exclude"),
                            message: format!("invalid glob pattern '{pat}'"),
                        });
                    }
                }
            }
        }

        if self.dispatch.workers == 0 {
            errors.push(ValidationError {
                field: "dispatch.workers".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.dispatch.retry_max == 0 {
            errors.push(ValidationError {
                field: "dispatch.retry_max".into(),
                message: "must be greater than 0".into(),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

/// Cheap structural check for glob patterns; full parsing happens in the
/// watch crate where the `glob` crate is available.
fn glob_pattern_invalid(pat: &str) -> bool {
    // An unclosed character class is the one input glob rejects outright.
    let opens = pat.matches('[').count();
    let closes = pat.matches(']').count();
    opens != closes
}
