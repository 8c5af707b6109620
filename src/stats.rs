//! Run statistics.
//!
//! These counters are plain fields, not atomics: the engine is
//! single-threaded (see `engine.rs`), so there is nothing to share across
//! tasks and atomics would be pure overhead.

/// Final (or in-progress) counts for one sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Files pushed to the remote side.
    pub files_uploaded: u64,
    /// Files pulled to the local side.
    pub files_downloaded: u64,
    /// Files removed, on either side.
    pub files_deleted: u64,
    /// Directories created, on either side.
    pub directories_created: u64,
    /// Directories removed, on either side.
    pub directories_deleted: u64,
    /// Total bytes transferred (upload + download).
    pub bytes_transferred: u64,
    /// Pairs left as unresolved conflicts.
    pub conflicts: u64,
    /// Recoverable copy errors encountered and logged.
    pub errors: u64,
    /// Total entries the engine looked at, whether or not they needed an
    /// operation; used to validate the dry-run invariant in tests.
    pub entries_touched: u64,
}

impl SyncStats {
    /// True if this run performed no mutation at all: no uploads,
    /// downloads, deletes, or directory creation/removal. Used to assert
    /// the idempotent-second-run invariant (spec §8).
    #[must_use]
    pub const fn is_no_op(&self) -> bool {
        self.files_uploaded == 0
            && self.files_downloaded == 0
            && self.files_deleted == 0
            && self.directories_created == 0
            && self.directories_deleted == 0
            && self.conflicts == 0
    }

    /// Nonzero exit status mapping: zero on full success, nonzero if any
    /// conflict was left unresolved or any error occurred.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.errors > 0 {
            2
        } else if self.conflicts > 0 {
            1
        } else {
            0
        }
    }
}
