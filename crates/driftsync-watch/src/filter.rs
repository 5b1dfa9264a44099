//! Glob-based path exclusion
//!
//! Each mapping may carry a `;`-separated list of glob patterns, e.g.
//! `*.tmp;*.swp;build/**`. A pattern matches either the whole relative
//! path or just the file name, so `*.tmp` excludes temporary files at
//! any depth without requiring `**/` prefixes.

use glob::{Pattern, PatternError};
use tracing::debug;

use driftsync_core::domain::relpath::RelPath;

/// Compiled exclusion patterns for one mapping
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<Pattern>,
}

impl ExclusionFilter {
    /// Compiles a `;`-separated pattern list. Empty segments are
    /// skipped, so trailing separators are harmless.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let patterns = raw
            .split(';')
            .filter(|p| !p.is_empty())
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Filter from an optional configuration value; `None` excludes
    /// nothing.
    pub fn from_config(raw: Option<&str>) -> Result<Self, PatternError> {
        match raw {
            Some(raw) => Self::parse(raw),
            None => Ok(Self::default()),
        }
    }

    /// Whether a relative path should be skipped.
    pub fn is_excluded(&self, path: &RelPath) -> bool {
        let excluded = self
            .patterns
            .iter()
            .any(|p| p.matches(path.as_str()) || p.matches(path.file_name()));
        if excluded {
            debug!(path = %path, "Path excluded by filter");
        }
        excluded
    }
}
