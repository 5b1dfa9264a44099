//! Relative path newtype
//!
//! Every mirror operation is expressed over paths *relative* to a
//! configured base directory, so the same `RelPath` can be resolved
//! against the local source base (native separators) and against a
//! remote destination base (always forward slashes, whatever the host
//! OS uses). The canonical internal form is a forward-slash string with
//! no leading or trailing separator.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A validated path relative to a backend's base directory
///
/// Guarantees at construction time:
/// - never absolute
/// - never contains `.` or `..` components
/// - never empty
///
/// Both `/` and `\` are accepted as input separators; the stored form
/// uses `/` exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// Creates a `RelPath` from any path-like input.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, DomainError> {
        let raw = path.as_ref().to_string_lossy();
        Self::parse(&raw)
    }

    fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.starts_with('/') || raw.starts_with('\\') || has_drive_prefix(raw) {
            return Err(DomainError::AbsolutePath(raw.to_string()));
        }

        let mut segments = Vec::new();
        for seg in raw.split(['/', '\\']) {
            match seg {
                "" | "." => continue,
                ".." => return Err(DomainError::PathTraversal(raw.to_string())),
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(DomainError::EmptyPath);
        }

        Ok(Self(segments.join("/")))
    }

    /// Builds a `RelPath` of a file inside `base` from its absolute path.
    ///
    /// Returns `None` when `path` is not located under `base`.
    pub fn relative_to(base: &Path, path: &Path) -> Option<Self> {
        let stripped = path.strip_prefix(base).ok()?;
        Self::new(stripped).ok()
    }

    /// The canonical forward-slash form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Final segment (file or directory name).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Parent path, or `None` when this path has a single segment.
    pub fn parent(&self) -> Option<RelPath> {
        self.0.rsplit_once('/').map(|(head, _)| RelPath(head.to_string()))
    }

    /// Appends a child path, validating the suffix.
    pub fn join(&self, suffix: impl AsRef<Path>) -> Result<RelPath, DomainError> {
        let child = Self::new(suffix)?;
        Ok(RelPath(format!("{}/{}", self.0, child.0)))
    }

    /// Resolves against a local base directory with native separators.
    pub fn to_native(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for seg in self.segments() {
            out.push(seg);
        }
        out
    }

    /// Resolves against a remote base path, always forward-slash form.
    pub fn to_remote(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        if base.is_empty() {
            self.0.clone()
        } else {
            format!("{}/{}", base, self.0)
        }
    }
}

/// Detects Windows-style `C:` drive prefixes, which mark absolute input.
fn has_drive_prefix(raw: &str) -> bool {
    let mut chars = raw.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(c), Some(':')) if c.is_ascii_alphabetic()
    )
}

impl Display for RelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RelPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RelPath> for String {
    fn from(value: RelPath) -> Self {
        value.0
    }
}
