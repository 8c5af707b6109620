//! Config file layer: a TOML document living below the CLI flags, the way
//! `szilu-syncr`'s `Config` layers defaults → file → flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::resolve::ResolveStrategy;

/// Deserialized shape of the on-disk config file. Every field is optional
/// so a user can override only what they care about; CLI flags always win
/// over whatever is set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    /// Default conflict resolution strategy.
    pub resolve: Option<ResolveStrategyConfig>,
    /// Default glob patterns to exclude.
    pub exclude: Option<Vec<String>>,
    /// Default glob patterns to include (applies to files only).
    #[serde(rename = "match")]
    pub match_glob: Option<Vec<String>>,
    /// Per-target connection timeout, in seconds.
    pub timeout_secs: Option<u64>,
    /// Whether to verify host keys for SFTP by default.
    pub verify_host_keys: Option<bool>,
}

/// A TOML-friendly mirror of [`ResolveStrategy`] (`clap::ValueEnum` drives
/// the CLI parsing of the same values; this exists so the config file
/// deserializes with serde's derive without requiring the CLI crate at
/// this layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStrategyConfig {
    /// See [`ResolveStrategy::Local`].
    Local,
    /// See [`ResolveStrategy::Remote`].
    Remote,
    /// See [`ResolveStrategy::Older`].
    Old,
    /// See [`ResolveStrategy::Newer`].
    New,
    /// See [`ResolveStrategy::Ask`].
    Ask,
    /// See [`ResolveStrategy::Skip`].
    Skip,
}

impl From<ResolveStrategyConfig> for ResolveStrategy {
    fn from(value: ResolveStrategyConfig) -> Self {
        match value {
            ResolveStrategyConfig::Local => Self::Local,
            ResolveStrategyConfig::Remote => Self::Remote,
            ResolveStrategyConfig::Old => Self::Older,
            ResolveStrategyConfig::New => Self::Newer,
            ResolveStrategyConfig::Ask => Self::Ask,
            ResolveStrategyConfig::Skip => Self::Skip,
        }
    }
}

impl FileConfig {
    /// Loads and parses `path`. Returns the default (empty) config if the
    /// file does not exist — a missing config file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigParse`] if the file exists but is not
    /// valid TOML for this shape, or [`SyncError::Io`] on any other read
    /// failure.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(SyncError::Io(e)),
        };
        toml::from_str(&contents)
            .map_err(|source| SyncError::ConfigParse { path: path.to_path_buf(), source: Box::new(source) })
    }

    /// Default config file location: `$XDG_CONFIG_HOME/ftpsync/config.toml`
    /// (or the platform equivalent via the `dirs` crate).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ftpsync").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = FileConfig::load(Path::new("/nonexistent/ftpsync-test-config.toml")).unwrap();
        assert!(cfg.resolve.is_none());
        assert!(cfg.exclude.is_none());
    }

    #[test]
    fn parses_a_minimal_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "resolve = \"new\"\nexclude = [\".DS_Store\"]\n").unwrap();
        let cfg = FileConfig::load(&path).unwrap();
        assert_eq!(cfg.resolve, Some(ResolveStrategyConfig::New));
        assert_eq!(cfg.exclude, Some(vec![".DS_Store".to_string()]));
    }
}
