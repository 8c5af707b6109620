//! Entry model: the typed value objects a directory listing produces, and
//! the classification labels derived from comparing them against metadata.
//!
//! An [`Entry`] is transient — it exists only for one traversal of one
//! directory and is discarded once that directory's pairs have been
//! dispatched.

use std::path::Path;

/// Filenames that are never synced, regardless of mode or filters.
pub const ALWAYS_OMIT: &[&str] = &[crate::dirmeta::META_FILE_NAME, crate::dirmeta::LOCK_FILE_NAME, CONFIG_FILE_NAME];

/// Name of the user-facing config file, excluded the same way the metadata
/// and lock files are.
pub const CONFIG_FILE_NAME: &str = "ftpsync.toml";

/// A named child of a directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Kind of filesystem object this entry represents.
    pub kind: EntryKind,
    /// Path-safe native name, relative to the containing directory.
    pub name: String,
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch (sub-second
    /// resolution where the backend provides it).
    pub mtime: f64,
    /// Opaque server-provided identity token, advisory only.
    pub unique: Option<String>,
    /// Set when this entry's listing line required the legacy-codec
    /// fallback to decode.
    pub encoding_fallback: bool,
}

/// Distinguishes files from directories. Symlinks are out of scope (see
/// Non-goals) and are reported as whichever kind they resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

impl Entry {
    /// True if this entry is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// True if `name` is one of the files that must never appear in a
    /// listing handed back to the engine.
    #[must_use]
    pub fn is_always_omitted(name: &str) -> bool {
        ALWAYS_OMIT.contains(&name)
    }
}

/// Per-side classification label, derived from comparing an [`Entry`]
/// (or its absence) against the directory's stored metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Entry is present and was previously unseen.
    New,
    /// Entry is present and matches the recorded size/mtime.
    Unmodified,
    /// Entry is present but differs from the recorded size/mtime.
    Modified,
    /// Entry is absent but metadata has a record of it.
    Deleted,
    /// Entry is absent and metadata has no record.
    Missing,
    /// Fallback used when no metadata is available to classify by
    /// (directories, or `need_compare` before the second pass resolves it).
    Existing,
}

/// The action to take on a pair, after classification and mode-policy
/// override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Both sides already agree; nothing to do.
    Equal,
    /// Push the local copy to the remote side.
    CopyLocal,
    /// Pull the remote copy to the local side.
    CopyRemote,
    /// Remove the local copy.
    DeleteLocal,
    /// Remove the remote copy.
    DeleteRemote,
    /// Classification was ambiguous from listings alone; compare directly.
    NeedCompare,
    /// Both sides changed since the last sync; ask the resolver.
    Conflict,
}

/// One pairing of a local entry with its (possibly absent) remote
/// counterpart, carrying the derived classification and operation.
///
/// Mutable during classification; discarded after the directory is
/// processed.
#[derive(Debug, Clone)]
pub struct EntryPair {
    /// The local-side entry, if one exists under this name.
    pub local: Option<Entry>,
    /// The remote-side entry, if one exists under this name.
    pub remote: Option<Entry>,
    /// Label assigned to the local side.
    pub local_label: Classification,
    /// Label assigned to the remote side.
    pub remote_label: Classification,
    /// The operation selected for this pair.
    pub operation: Operation,
}

impl EntryPair {
    /// The name shared by whichever side is present (both sides, when both
    /// are present, always agree once case policy has been applied).
    #[must_use]
    pub fn name(&self) -> &str {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map_or("", |e| e.name.as_str())
    }

    /// True when either side is a directory (both sides agree on kind once
    /// paired; a file/directory name collision is treated as a conflict
    /// upstream of pairing).
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.local.as_ref().or(self.remote.as_ref()).is_some_and(Entry::is_dir)
    }
}

/// True if `path`'s only component is one of the always-omitted names.
#[must_use]
pub fn name_is_omitted(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(Entry::is_always_omitted)
}
