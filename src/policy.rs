//! Mode policies: Bidirectional, Upload, and Download, expressed as
//! strategy objects rather than a subclass hierarchy.
//!
//! Each policy is a small struct of side-flags plus two hooks —
//! `reclassify` and a resolver strategy selector — that the engine
//! consults after the pure classifier (`classify.rs`) has produced a
//! default operation.

use crate::entry::{Classification, EntryPair, Operation};
use crate::resolve::ResolveStrategy;

/// Which sync direction the user selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncMode {
    /// Both sides may be written; conflicts are resolved interactively or
    /// per `--resolve`.
    Bidirectional,
    /// Only the remote side is written; the local tree is the source of
    /// truth.
    Upload,
    /// Only the local side is written; the remote tree is the source of
    /// truth.
    Download,
}

/// Side-flags and overrides shared by all three modes; the engine holds
/// one of these for the duration of a run.
#[derive(Debug, Clone)]
pub struct ModePolicy {
    /// Which direction this policy implements.
    pub mode: SyncMode,
    /// The local side must not be written.
    pub local_readonly: bool,
    /// The remote side must not be written.
    pub remote_readonly: bool,
    /// `--delete` / `--delete-unmatched`: whether a one-sided deletion may
    /// propagate to the other side in upload/download mode.
    pub allow_delete: bool,
    /// `--force`: collapse any disagreement towards the writable side.
    pub force: bool,
}

impl ModePolicy {
    /// Builds the policy struct for `mode`.
    #[must_use]
    pub const fn new(mode: SyncMode, allow_delete: bool, force: bool) -> Self {
        let (local_readonly, remote_readonly) = match mode {
            SyncMode::Bidirectional => (false, false),
            SyncMode::Upload => (true, false),
            SyncMode::Download => (false, true),
        };
        Self { mode, local_readonly, remote_readonly, allow_delete, force }
    }

    /// Gives the policy a chance to override the classifier's default
    /// operation for `pair`. Returns `None` to accept the default.
    #[must_use]
    pub fn reclassify(&self, pair: &EntryPair) -> Option<Operation> {
        match self.mode {
            SyncMode::Bidirectional => {
                if self.force && matches!(pair.operation, Operation::NeedCompare | Operation::Conflict) {
                    return Some(if pair.local.is_some() { Operation::CopyLocal } else { Operation::CopyRemote });
                }
                None
            }
            SyncMode::Upload => self.reclassify_one_sided(pair, true),
            SyncMode::Download => self.reclassify_one_sided(pair, false),
        }
    }

    /// Shared logic for Upload (`local_is_source = true`) and Download
    /// (`local_is_source = false`): the writable-peer side's deletions
    /// only propagate when `--delete` is set, reverse-direction copies
    /// become skips, and `--force` collapses any disagreement onto the
    /// source side.
    fn reclassify_one_sided(&self, pair: &EntryPair, local_is_source: bool) -> Option<Operation> {
        let (source_label, dest_label) =
            if local_is_source { (pair.local_label, pair.remote_label) } else { (pair.remote_label, pair.local_label) };
        let copy_to_dest = if local_is_source { Operation::CopyLocal } else { Operation::CopyRemote };
        let copy_from_dest = if local_is_source { Operation::CopyRemote } else { Operation::CopyLocal };
        let delete_source = if local_is_source { Operation::DeleteLocal } else { Operation::DeleteRemote };
        let delete_dest = if local_is_source { Operation::DeleteRemote } else { Operation::DeleteLocal };

        if matches!(source_label, Classification::Missing) && matches!(dest_label, Classification::New) {
            return Some(if self.allow_delete { delete_dest } else { Operation::Equal });
        }
        if pair.operation == copy_from_dest || pair.operation == delete_source {
            return Some(Operation::Equal);
        }
        if self.force && matches!(pair.operation, Operation::NeedCompare | Operation::Conflict) {
            return Some(copy_to_dest);
        }
        None
    }

    /// Which resolver outcomes are legal to pick from for this mode. Used
    /// to validate `--resolve` at startup and to restrict the interactive
    /// menu.
    #[must_use]
    pub fn allowed_resolutions(&self) -> &'static [ResolveStrategy] {
        use ResolveStrategy::{Ask, Local, Newer, Older, Remote, Skip};
        match self.mode {
            SyncMode::Bidirectional => &[Local, Remote, Older, Newer, Ask, Skip],
            SyncMode::Upload => &[Local, Skip, Ask],
            SyncMode::Download => &[Remote, Skip, Ask],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    fn pair(local: bool, remote: bool, local_label: Classification, remote_label: Classification, op: Operation) -> EntryPair {
        let mk = |present: bool| {
            present.then(|| crate::entry::Entry {
                kind: EntryKind::File,
                name: "x".into(),
                size: 1,
                mtime: 1.0,
                unique: None,
                encoding_fallback: false,
            })
        };
        EntryPair { local: mk(local), remote: mk(remote), local_label, remote_label, operation: op }
    }

    #[test]
    fn upload_mode_turns_missing_new_into_delete_remote_when_allowed() {
        let policy = ModePolicy::new(SyncMode::Upload, true, false);
        let p = pair(false, true, Classification::Missing, Classification::New, Operation::CopyRemote);
        assert_eq!(policy.reclassify(&p), Some(Operation::DeleteRemote));
    }

    #[test]
    fn upload_mode_skips_remote_deletion_without_delete_flag() {
        let policy = ModePolicy::new(SyncMode::Upload, false, false);
        let p = pair(false, true, Classification::Missing, Classification::New, Operation::CopyRemote);
        assert_eq!(policy.reclassify(&p), Some(Operation::Equal));
    }

    #[test]
    fn upload_mode_skips_copy_remote_and_delete_local() {
        let policy = ModePolicy::new(SyncMode::Upload, true, false);
        let copy_remote = pair(true, true, Classification::Unmodified, Classification::Modified, Operation::CopyRemote);
        assert_eq!(policy.reclassify(&copy_remote), Some(Operation::Equal));

        let delete_local = pair(true, false, Classification::Deleted, Classification::Unmodified, Operation::DeleteLocal);
        assert_eq!(policy.reclassify(&delete_local), Some(Operation::Equal));
    }

    #[test]
    fn force_collapses_conflict_towards_writable_side() {
        let policy = ModePolicy::new(SyncMode::Upload, false, true);
        let conflict = pair(true, true, Classification::Modified, Classification::Modified, Operation::Conflict);
        assert_eq!(policy.reclassify(&conflict), Some(Operation::CopyLocal));
    }

    #[test]
    fn bidirectional_is_a_no_op_without_force() {
        let policy = ModePolicy::new(SyncMode::Bidirectional, false, false);
        let p = pair(true, true, Classification::Modified, Classification::Modified, Operation::Conflict);
        assert_eq!(policy.reclassify(&p), None);
    }
}
