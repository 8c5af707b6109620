//! Error taxonomy for the synchronizer.
//!
//! Mirrors the semantic categories a sync run can fail with rather than the
//! shape of any one backend's error type. Backend-specific failures
//! (an FTP reply, an `ssh2` error, an `io::Error`) are boxed into
//! [`SyncError::source`] so callers can match on the taxonomy without
//! depending on backend crates.

use std::fmt;
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// The error taxonomy the engine and backends report through.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Backend negotiation failed: TCP connect, TLS handshake, or the
    /// initial protocol greeting.
    #[error("could not connect to {target}: {source}")]
    Connect {
        /// Human-readable description of the endpoint that was being dialed.
        target: String,
        /// Underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Credentials were rejected by the remote server.
    #[error("authentication failed for {target}")]
    Auth {
        /// Human-readable description of the endpoint.
        target: String,
    },

    /// A `cwd` argument resolved outside of `root_dir`.
    #[error("path {attempted} escapes root {root}")]
    PathEscape {
        /// The root directory the target is jailed to.
        root: PathBuf,
        /// The path that was rejected.
        attempted: PathBuf,
    },

    /// A mutating operation was attempted against a read-only target.
    #[error("write denied: {operation} on read-only target")]
    WriteDenied {
        /// Name of the operation that was refused.
        operation: &'static str,
    },

    /// The on-disk metadata schema is newer than this binary understands.
    #[error("metadata version {found} is newer than supported version {supported}")]
    IncompatibleMetadataVersion {
        /// Version recorded in the metadata file.
        found: u32,
        /// Highest version this binary understands.
        supported: u32,
    },

    /// A single file transfer failed.
    #[error("failed to copy {name}: {source}")]
    CopyError {
        /// Name of the entry being copied.
        name: String,
        /// Underlying I/O or protocol error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A case-insensitive name collision was found with no case policy to
    /// resolve it.
    #[error("ambiguous case collision between {a} and {b} in {dir}")]
    AmbiguousCase {
        /// Directory the collision was found in.
        dir: PathBuf,
        /// First colliding name.
        a: String,
        /// Second colliding name.
        b: String,
    },

    /// A listing line could not be decoded even with the legacy-codec
    /// fallback.
    #[error("could not decode listing entry in {dir}: {detail}")]
    ListingParse {
        /// Directory the listing was read from.
        dir: PathBuf,
        /// Decoder diagnostic.
        detail: String,
    },

    /// The lock file on the remote root belongs to another, still-live
    /// session.
    #[error("remote root is locked by {holder} since {since}")]
    Locked {
        /// Identity recorded in the lock file, if any.
        holder: String,
        /// Lock timestamp, formatted for display.
        since: String,
    },

    /// The run was cancelled by the user (e.g. Ctrl+C).
    #[error("interrupted")]
    Interrupted,

    /// Catch-all for local filesystem I/O outside the taxonomy above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata file content did not parse as valid JSON.
    #[error("malformed metadata in {path}: {source}")]
    MetadataParse {
        /// Path of the offending metadata file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Config file content did not parse as valid TOML.
    #[error("malformed config file {path}: {source}")]
    ConfigParse {
        /// Path of the offending config file.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
}

impl SyncError {
    /// Wraps an arbitrary transport error as a [`SyncError::Connect`].
    pub fn connect(target: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connect { target: target.into(), source: Box::new(source) }
    }

    /// Wraps an arbitrary transfer error as a [`SyncError::CopyError`].
    pub fn copy(name: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::CopyError { name: name.into(), source: Box::new(source) }
    }

    /// True for errors that, under `ignore_copy_errors`, should be logged
    /// and counted rather than aborting the traversal.
    #[must_use]
    pub const fn is_recoverable_copy_error(&self) -> bool {
        matches!(self, Self::CopyError { .. })
    }
}

/// A lightweight stand-in used where a backend has no finer-grained error
/// type of its own (e.g. a decoded FTP reply string).
#[derive(Debug)]
pub struct BackendMessage(pub String);

impl fmt::Display for BackendMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BackendMessage {}
