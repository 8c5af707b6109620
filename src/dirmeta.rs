//! Per-directory metadata store.
//!
//! Each directory on each target carries a side-channel snapshot recording
//! the last observed size, modification time, and upload time of every
//! file the engine has touched. Neither FTP nor SFTP reliably preserve
//! client-set mtimes, so this snapshot — not the server's reported mtime —
//! is the ground truth the classifier compares against.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Hidden filename the metadata document is persisted under, one per
/// directory.
pub const META_FILE_NAME: &str = ".ftpsync-meta.json";

/// Filename of the lock document written to the remote root.
pub const LOCK_FILE_NAME: &str = ".ftpsync-lock.json";

/// Highest metadata schema version this binary understands.
pub const SUPPORTED_VERSION: u32 = 2;

/// Default tolerance, in seconds, when comparing two timestamps.
pub const DEFAULT_MTIME_EPS: f64 = 2.0;

/// Widened tolerance for backends that cannot resolve sub-minute precision
/// (e.g. an FTP `LIST` response).
pub const MINUTE_RESOLUTION_MTIME_EPS: f64 = 61.0;

/// One file's recorded size, mtime, and upload time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Size in bytes at last observation.
    pub s: u64,
    /// Modification time, seconds since the Unix epoch.
    pub m: f64,
    /// Time this record was written, seconds since the Unix epoch.
    pub u: f64,
}

/// The persisted snapshot of one directory on one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirMetadata {
    /// Schema version. A version higher than [`SUPPORTED_VERSION`] is
    /// fatal to read unless migration is explicitly enabled.
    pub version: u32,
    /// This side's own last-known view of each file.
    pub files: BTreeMap<String, FileRecord>,
    /// Per-peer mirror of what that peer last had, keyed by peer id. Lets
    /// the engine detect peer-side deletions without rereading the peer.
    pub peer_sync: BTreeMap<String, BTreeMap<String, FileRecord>>,
    /// Fields present in the on-disk document that this version of the
    /// code does not recognize. Preserved verbatim on rewrite.
    #[serde(flatten)]
    pub unknown: serde_json::Map<String, serde_json::Value>,

    /// Tracks whether this snapshot has been mutated since it was loaded
    /// (or created); `flush` is a no-op when clear. Never serialized.
    #[serde(skip)]
    dirty: bool,
}

impl Default for DirMetadata {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            files: BTreeMap::new(),
            peer_sync: BTreeMap::new(),
            unknown: serde_json::Map::new(),
            dirty: false,
        }
    }
}

impl DirMetadata {
    /// Parses a metadata document from its on-disk JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IncompatibleMetadataVersion`] if the stored
    /// version is newer than [`SUPPORTED_VERSION`], or
    /// [`SyncError::MetadataParse`] if the content is not valid JSON.
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        let meta: Self = serde_json::from_slice(bytes)
            .map_err(|source| SyncError::MetadataParse { path: path.to_path_buf(), source })?;
        if meta.version > SUPPORTED_VERSION {
            return Err(SyncError::IncompatibleMetadataVersion {
                found: meta.version,
                supported: SUPPORTED_VERSION,
            });
        }
        Ok(meta)
    }

    /// Serializes this snapshot to its on-disk JSON representation.
    ///
    /// # Errors
    ///
    /// Returns an error only if the in-memory structure somehow cannot be
    /// represented as JSON, which does not happen for the types here.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|source| SyncError::MetadataParse {
            path: Path::new(META_FILE_NAME).to_path_buf(),
            source,
        })
    }

    /// Looks up this side's last-known record for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FileRecord> {
        self.files.get(name)
    }

    /// Looks up what `peer_id` last had for `name`, if it was ever mirrored.
    #[must_use]
    pub fn get_peer(&self, peer_id: &str, name: &str) -> Option<&FileRecord> {
        self.peer_sync.get(peer_id).and_then(|m| m.get(name))
    }

    /// Records that `name` was synced at `mtime`/`size`, stamping the
    /// upload time as `now`. Marks the snapshot dirty.
    pub fn set_sync_info(&mut self, name: &str, mtime: f64, size: u64, now: f64) {
        self.files.insert(name.to_string(), FileRecord { s: size, m: mtime, u: now });
        self.dirty = true;
    }

    /// Mirrors `record` under `peer_id`'s view of `name`, so a later sync
    /// can detect a peer-side deletion without rereading the peer.
    pub fn mirror_peer(&mut self, peer_id: &str, name: &str, record: FileRecord) {
        self.peer_sync.entry(peer_id.to_string()).or_default().insert(name.to_string(), record);
        self.dirty = true;
    }

    /// Removes any record of `name` from this side and from every mirrored
    /// peer view. Used after a delete.
    pub fn remove(&mut self, name: &str) {
        if self.files.remove(name).is_some() {
            self.dirty = true;
        }
        for peer in self.peer_sync.values_mut() {
            if peer.remove(name).is_some() {
                self.dirty = true;
            }
        }
    }

    /// True if this snapshot has unflushed mutations.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag after a successful flush.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// The lock document written to the remote root on `open` and removed on
/// `close`. Doubles as a clock-skew probe: the target reads its own mtime
/// back immediately after writing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    /// Time the lock was acquired, seconds since the Unix epoch (as
    /// measured by the acquiring client).
    pub lock_time: f64,
    /// Identity of whoever holds the lock, if known.
    pub lock_holder: Option<String>,
}

impl LockFile {
    /// Serializes this lock document to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization somehow fails, which does
    /// not happen for this structure.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| SyncError::MetadataParse {
            path: Path::new(LOCK_FILE_NAME).to_path_buf(),
            source,
        })
    }

    /// Parses a lock document from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MetadataParse`] if the content is not valid
    /// JSON for this shape.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|source| SyncError::MetadataParse { path: Path::new(LOCK_FILE_NAME).to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut meta = DirMetadata::default();
        meta.set_sync_info("a.txt", 1000.0, 3, 1001.0);
        meta.mirror_peer("host:/remote", "a.txt", FileRecord { s: 3, m: 1000.0, u: 1001.0 });

        let bytes = meta.to_json().unwrap();
        let parsed = DirMetadata::parse(Path::new(META_FILE_NAME), &bytes).unwrap();

        assert_eq!(parsed.get("a.txt"), meta.get("a.txt"));
        assert_eq!(parsed.get_peer("host:/remote", "a.txt"), meta.get_peer("host:/remote", "a.txt"));
        assert_eq!(parsed.version, SUPPORTED_VERSION);
    }

    #[test]
    fn rejects_future_version() {
        let doc = serde_json::json!({ "version": SUPPORTED_VERSION + 1, "files": {}, "peer_sync": {} });
        let bytes = serde_json::to_vec(&doc).unwrap();
        let err = DirMetadata::parse(Path::new(META_FILE_NAME), &bytes).unwrap_err();
        assert!(matches!(err, SyncError::IncompatibleMetadataVersion { .. }));
    }

    #[test]
    fn preserves_unknown_fields_on_rewrite() {
        let doc = serde_json::json!({
            "version": 2,
            "files": {},
            "peer_sync": {},
            "future_field": "kept",
        });
        let bytes = serde_json::to_vec(&doc).unwrap();
        let meta = DirMetadata::parse(Path::new(META_FILE_NAME), &bytes).unwrap();
        let rewritten = meta.to_json().unwrap();
        let rewritten_value: serde_json::Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(rewritten_value["future_field"], "kept");
    }

    #[test]
    fn remove_clears_all_peer_mirrors() {
        let mut meta = DirMetadata::default();
        meta.set_sync_info("a.txt", 1000.0, 3, 1001.0);
        meta.mirror_peer("peer-a", "a.txt", FileRecord { s: 3, m: 1000.0, u: 1001.0 });
        meta.mirror_peer("peer-b", "a.txt", FileRecord { s: 3, m: 1000.0, u: 1001.0 });
        meta.mark_clean();

        meta.remove("a.txt");

        assert!(meta.get("a.txt").is_none());
        assert!(meta.get_peer("peer-a", "a.txt").is_none());
        assert!(meta.get_peer("peer-b", "a.txt").is_none());
        assert!(meta.is_dirty());
    }
}
