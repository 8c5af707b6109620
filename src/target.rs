//! The abstract storage endpoint the engine drives.
//!
//! A [`Target`] is either a local directory tree or a remote FTP/FTPS/SFTP
//! root (see `backends/`). The engine only ever talks to `dyn Target`; it
//! has no knowledge of which concrete backend it holds.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dirmeta::DirMetadata;
use crate::entry::Entry;
use crate::error::{Result, SyncError};

/// A boxed, owned readable byte stream. Backends that cannot seek on a
/// live connection (an open FTP data channel) buffer through a spooled
/// temporary file before returning one of these; see `backends::spool`.
pub type ReadStream = Box<dyn AsyncRead + Unpin + Send>;

/// Invoked with the number of bytes transferred for each block of a
/// `write_file`/`copy_to_file` call, so the engine can update byte-count
/// statistics and progress without the backend knowing about either.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(u64) + Send);

/// Runtime flags that gate every mutating operation on a target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetFlags {
    /// When set, every mutating call returns [`SyncError::WriteDenied`]
    /// before performing any I/O.
    pub readonly: bool,
    /// When set, mutating calls are logged and reflected in statistics but
    /// never actually performed.
    pub dry_run: bool,
}

/// Tolerance, in seconds, this target's listings should be compared with.
/// Widened by backends whose directory listing cannot resolve sub-minute
/// precision (plain FTP `LIST`).
#[derive(Debug, Clone, Copy)]
pub struct MtimeEps(pub f64);

impl Default for MtimeEps {
    fn default() -> Self {
        Self(crate::dirmeta::DEFAULT_MTIME_EPS)
    }
}

/// Abstract storage endpoint. Every method that performs I/O is async and
/// is, from the engine's point of view, a suspension point (see
/// `engine.rs`'s module doc for the concurrency contract: these are never
/// awaited concurrently with each other).
#[async_trait]
pub trait Target: Send {
    /// Stable string identifying this endpoint, used as the peer id the
    /// opposite side records its mirrored view under.
    fn get_id(&self) -> &str;

    /// The root directory this target is jailed to.
    fn root_dir(&self) -> &Path;

    /// The target's current working directory, always a descendant of
    /// [`Target::root_dir`].
    fn cur_dir(&self) -> &Path;

    /// Runtime flags in effect for this target.
    fn flags(&self) -> TargetFlags;

    /// Tolerance to use when comparing this target's timestamps.
    fn mtime_eps(&self) -> MtimeEps {
        MtimeEps::default()
    }

    /// The clock offset (seconds) measured between this target's reported
    /// time and the local wall clock, computed during `open` by writing
    /// and immediately rereading the lock file. Zero for local targets.
    fn server_time_ofs(&self) -> f64 {
        0.0
    }

    /// Establishes the connection (or, for a local target, verifies the
    /// root exists) and, for remote-style targets, acquires the lock file
    /// and measures clock skew.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connect`]/[`SyncError::Auth`] on negotiation
    /// failure, or [`SyncError::Locked`] if the root is already locked by
    /// another session and `break_existing` was not requested.
    async fn open(&mut self) -> Result<()>;

    /// Releases the connection and, for remote-style targets, removes the
    /// lock file. Idempotent; safe to call after a failed `open`.
    async fn close(&mut self) -> Result<()>;

    /// Navigates to a child (`name`) or to the parent (`".."`) of the
    /// current directory. Invalidates any loaded metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PathEscape`] if the resulting path would not
    /// remain a descendant of `root_dir`.
    async fn cwd(&mut self, name: &str) -> Result<()>;

    /// The server's reported current directory, normalized (trailing
    /// slash stripped except at the root).
    fn pwd(&self) -> PathBuf {
        self.cur_dir().to_path_buf()
    }

    /// Creates a child directory of the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WriteDenied`] if this target is read-only.
    async fn mkdir(&mut self, name: &str) -> Result<()>;

    /// Recursively removes a child directory. FTP-style backends must
    /// emulate the recursion themselves since the wire protocol forbids
    /// removing a non-empty directory directly.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WriteDenied`] if this target is read-only.
    async fn rmdir(&mut self, name: &str) -> Result<()>;

    /// Lists the current directory, with metadata already merged in (see
    /// `merge_listing`). Never includes the metadata file, the config
    /// file, or (at the root) the lock file.
    ///
    /// # Errors
    ///
    /// Individual undecodable lines are represented as
    /// `encoding_fallback` entries or dropped with a logged
    /// [`SyncError::ListingParse`]; this call itself fails only on a
    /// transport-level error.
    async fn get_dir(&mut self) -> Result<Vec<Entry>>;

    /// Opens `name` for reading. Backends that cannot seek on a live
    /// connection buffer through a spooled temporary file.
    async fn open_readable(&mut self, name: &str) -> Result<ReadStream>;

    /// Streams `src` into `name`, invoking `progress` once per block, and
    /// returns the number of bytes actually written (`0` under `dry_run`,
    /// since no I/O happens). Callers that need an accurate transferred-
    /// bytes count must use this return value, not the source listing's
    /// reported size. `mtime`, if given, is set best-effort (some
    /// protocols cannot set it server-side at all).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WriteDenied`] if this target is read-only, or
    /// [`SyncError::CopyError`] on a transfer failure.
    async fn write_file(
        &mut self,
        name: &str,
        src: &mut (dyn AsyncRead + Unpin + Send),
        mtime: Option<f64>,
        progress: ProgressCallback<'_>,
    ) -> Result<u64>;

    /// Streams `name` directly into `dest`, avoiding an intermediate
    /// buffer when this target's reads cannot be randomly re-read.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CopyError`] on a transfer failure.
    async fn copy_to_file(
        &mut self,
        name: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
        progress: ProgressCallback<'_>,
    ) -> Result<()>;

    /// Removes a regular file and clears its metadata record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WriteDenied`] if this target is read-only.
    async fn remove_file(&mut self, name: &str) -> Result<()>;

    /// True when this target's listing cannot distinguish random-access
    /// reads from a streamed connection (used to pick the copy strategy in
    /// `engine::copy_file`).
    fn supports_random_access_read(&self) -> bool {
        true
    }

    /// The currently loaded metadata for the current directory. Loaded
    /// lazily by the engine on first access after a `cwd`.
    fn meta(&self) -> &DirMetadata;

    /// Mutable access to the currently loaded metadata.
    fn meta_mut(&mut self) -> &mut DirMetadata;

    /// Records that `name` was synced at `mtime`/`size` in the currently
    /// loaded metadata.
    fn set_sync_info(&mut self, name: &str, mtime: f64, size: u64, now: f64) {
        self.meta_mut().set_sync_info(name, mtime, size, now);
    }

    /// Clears `name` from the currently loaded metadata.
    fn remove_sync_info(&mut self, name: &str) {
        self.meta_mut().remove(name);
    }

    /// Pushes a fresh, empty metadata context for a directory about to be
    /// entered (recursion scope). Paired with [`Target::pop_meta`].
    fn push_meta(&mut self, meta: DirMetadata);

    /// Pops back to the metadata context of the enclosing directory,
    /// returning the one that was active.
    fn pop_meta(&mut self) -> Option<DirMetadata>;

    /// Persists the currently loaded metadata if it is dirty, unless this
    /// target is `dry_run` or `readonly`.
    ///
    /// # Errors
    ///
    /// Returns an I/O or protocol error if the write fails.
    async fn flush_meta(&mut self) -> Result<()>;
}

/// Refuses a mutating call outright when the target is read-only or in a
/// dry run. Backends call this first thing inside every method that
/// writes.
///
/// # Errors
///
/// Returns [`SyncError::WriteDenied`] when `flags.readonly` is set.
pub fn guard_writable(flags: TargetFlags, operation: &'static str) -> Result<()> {
    if flags.readonly {
        return Err(SyncError::WriteDenied { operation });
    }
    Ok(())
}

/// Applies the listing-merge rule (§4.3): reconciles a freshly listed
/// entry's reported mtime against the stored metadata record, discarding
/// the server's reported value when it's consistent with our own last
/// upload (spurious drift), and otherwise trusting the listing.
///
/// The check is intentionally one-sided: a reported mtime that is *later*
/// than the recorded upload time by more than `eps` means the file was
/// genuinely touched since we last synced it, so the listing wins. A
/// reported mtime that is earlier than (or within `eps` of) the recorded
/// upload time is always spurious drift and gets overwritten with the
/// stored value, no matter how large that gap is.
#[must_use]
pub fn merge_listing_entry(mut entry: Entry, eps: f64, record: Option<&crate::dirmeta::FileRecord>) -> Entry {
    if let Some(r) = record {
        if r.s == entry.size && entry.mtime - r.u <= eps {
            entry.mtime = r.m;
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirmeta::FileRecord;
    use crate::entry::EntryKind;

    fn file(name: &str, size: u64, mtime: f64) -> Entry {
        Entry { kind: EntryKind::File, name: name.to_string(), size, mtime, unique: None, encoding_fallback: false }
    }

    #[test]
    fn guard_writable_rejects_readonly() {
        let err = guard_writable(TargetFlags { readonly: true, dry_run: false }, "remove_file").unwrap_err();
        assert!(matches!(err, SyncError::WriteDenied { .. }));
    }

    #[test]
    fn guard_writable_allows_dry_run() {
        // dry_run still performs the call path (so stats can reflect what
        // *would* happen); only readonly short-circuits here.
        guard_writable(TargetFlags { readonly: false, dry_run: true }, "remove_file").unwrap();
    }

    #[test]
    fn merge_listing_discards_spurious_drift() {
        let e = file("d.txt", 10, 512.0);
        let record = FileRecord { s: 10, m: 500.0, u: 510.0 };
        let merged = merge_listing_entry(e, 2.0, Some(&record));
        assert!((merged.mtime - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_listing_keeps_reported_mtime_on_real_change() {
        let e = file("d.txt", 10, 9000.0);
        let record = FileRecord { s: 10, m: 500.0, u: 510.0 };
        let merged = merge_listing_entry(e, 2.0, Some(&record));
        assert!((merged.mtime - 9000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_listing_overwrites_unconditionally_when_reported_is_earlier() {
        // The rule is one-sided: a reported mtime *behind* the recorded
        // upload time is always treated as spurious, regardless of how far
        // behind it is, since the reported time can only diverge this way
        // by artifacts of the server's own clock/rewrite behavior.
        let e = file("d.txt", 10, 100.0);
        let record = FileRecord { s: 10, m: 500.0, u: 510.0 };
        let merged = merge_listing_entry(e, 2.0, Some(&record));
        assert!((merged.mtime - 500.0).abs() < f64::EPSILON);
    }
}
