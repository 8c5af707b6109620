//! Pair classification: given a local entry, a remote entry, and the
//! directory's stored metadata, decide what operation to perform.
//!
//! This is deliberately pure and synchronous — it never touches a target,
//! only the already-listed [`Entry`] values and the already-loaded
//! [`DirMetadata`] views, so it can be exhaustively unit tested without a
//! backend.

use crate::dirmeta::DirMetadata;
use crate::entry::{Classification, Entry, EntryPair, Operation};

/// Labels one side of a pair given the entry (if present) and the relevant
/// metadata record (if any).
#[must_use]
pub fn classify_side(entry: Option<&Entry>, eps: f64, record: Option<&crate::dirmeta::FileRecord>) -> Classification {
    match (entry, record) {
        (None, None) => Classification::Missing,
        (None, Some(_)) => Classification::Deleted,
        (Some(e), _) if e.is_dir() => {
            // Directories are not size/mtime tracked the same way files
            // are; absent a stronger signal they are `existing` and their
            // children are classified independently on descent.
            if record.is_some() {
                Classification::Existing
            } else {
                Classification::New
            }
        }
        (Some(_), None) => Classification::New,
        (Some(e), Some(r)) => {
            if (e.mtime - r.m).abs() <= eps && e.size == r.s {
                Classification::Unmodified
            } else {
                Classification::Modified
            }
        }
    }
}

/// Maps a `(local, remote)` label pair to its default operation, per the
/// fixed classification table. Returns `None` for tuples that cannot occur
/// given how labels are derived (there is no programmer-reachable path to
/// them); callers should treat `None` as a bug, not a runtime condition.
#[must_use]
pub fn operation_for(local: Classification, remote: Classification) -> Option<Operation> {
    use Classification::{Deleted, Existing, Missing, Modified, New, Unmodified};
    use Operation::{Conflict, CopyLocal, CopyRemote, DeleteLocal, DeleteRemote, Equal, NeedCompare};

    Some(match (local, remote) {
        (New, Missing) => CopyLocal,
        (Missing, New) => CopyRemote,
        (Unmodified, Unmodified) => Equal,
        (Modified, Unmodified) => CopyLocal,
        (Unmodified, Modified) => CopyRemote,
        (Modified, Modified) => Conflict,
        (Unmodified, Deleted) => DeleteLocal,
        (Deleted, Unmodified) => DeleteRemote,
        (Modified, Deleted) => Conflict,
        (Deleted, Modified) => Conflict,
        (Deleted, Deleted) => Equal,
        (Existing, Existing) => NeedCompare,
        (New, New) => NeedCompare,
        (Missing, Missing) => Equal,
        _ => return None,
    })
}

/// Builds a fully classified [`EntryPair`] from listing entries and the
/// two metadata views that apply to them.
#[must_use]
pub fn classify_pair(
    local: Option<Entry>,
    remote: Option<Entry>,
    eps: f64,
    local_meta: &DirMetadata,
    remote_meta: &DirMetadata,
) -> EntryPair {
    let name = local.as_ref().or(remote.as_ref()).map(|e| e.name.clone()).unwrap_or_default();
    let local_label = classify_side(local.as_ref(), eps, local_meta.get(&name));
    let remote_label = classify_side(remote.as_ref(), eps, remote_meta.get(&name));
    let operation = operation_for(local_label, remote_label).unwrap_or(Operation::Conflict);

    EntryPair { local, remote, local_label, remote_label, operation }
}

/// Resolves a `need_compare` pair by comparing the two sides directly
/// (mtime first, then size). Files that remain indistinguishable by that
/// comparison but still differ become a conflict; directories fall back to
/// `equal` since their children are walked independently.
#[must_use]
pub fn resolve_need_compare(pair: &EntryPair, eps: f64) -> Operation {
    match (&pair.local, &pair.remote) {
        (Some(l), Some(r)) => {
            if l.is_dir() && r.is_dir() {
                return Operation::Equal;
            }
            if (l.mtime - r.mtime).abs() <= eps {
                if l.size == r.size {
                    Operation::Equal
                } else {
                    Operation::Conflict
                }
            } else if l.mtime > r.mtime {
                Operation::CopyLocal
            } else {
                Operation::CopyRemote
            }
        }
        (Some(l), None) if l.is_dir() => Operation::Equal,
        (None, Some(r)) if r.is_dir() => Operation::Equal,
        _ => Operation::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    fn file(name: &str, size: u64, mtime: f64) -> Entry {
        Entry { kind: EntryKind::File, name: name.to_string(), size, mtime, unique: None, encoding_fallback: false }
    }

    #[test]
    fn classifier_is_total_on_reachable_tuples() {
        use Classification::{Deleted, Existing, Missing, Modified, New, Unmodified};
        let reachable = [
            (New, Missing),
            (Missing, New),
            (Unmodified, Unmodified),
            (Modified, Unmodified),
            (Unmodified, Modified),
            (Modified, Modified),
            (Unmodified, Deleted),
            (Deleted, Unmodified),
            (Modified, Deleted),
            (Deleted, Modified),
            (Deleted, Deleted),
            (Existing, Existing),
            (New, New),
            (Missing, Missing),
        ];
        for (l, r) in reachable {
            assert!(operation_for(l, r).is_some(), "no operation for ({l:?}, {r:?})");
        }
    }

    #[test]
    fn new_file_upload_scenario() {
        let mut local_meta = DirMetadata::default();
        let remote_meta = DirMetadata::default();
        let local = Some(file("a.txt", 3, 1000.0));
        let pair = classify_pair(local, None, 2.0, &local_meta, &remote_meta);
        assert_eq!(pair.operation, Operation::CopyLocal);
        local_meta.set_sync_info("a.txt", 1000.0, 3, 1001.0);
        assert_eq!(local_meta.get("a.txt").unwrap().s, 3);
    }

    #[test]
    fn downstream_deletion_scenario() {
        let mut local_meta = DirMetadata::default();
        local_meta.set_sync_info("b.txt", 500.0, 10, 501.0);
        let remote_meta = DirMetadata::default();
        let pair = classify_pair(Some(file("b.txt", 10, 500.0)), None, 2.0, &local_meta, &remote_meta);
        assert_eq!(pair.operation, Operation::DeleteLocal);
    }

    #[test]
    fn spurious_mtime_drift_is_ignored() {
        // Merge rule (performed at listing time, see target::merge_listing)
        // has already overwritten the remote mtime with the stored one
        // because `reported - upload_time <= eps`; here we just check the
        // classifier treats the corrected entry as unmodified.
        let mut local_meta = DirMetadata::default();
        local_meta.set_sync_info("d.txt", 500.0, 10, 510.0);
        let mut remote_meta = DirMetadata::default();
        remote_meta.set_sync_info("d.txt", 500.0, 10, 510.0);
        let pair = classify_pair(
            Some(file("d.txt", 10, 500.0)),
            Some(file("d.txt", 10, 500.0)),
            2.0,
            &local_meta,
            &remote_meta,
        );
        assert_eq!(pair.operation, Operation::Equal);
    }

    #[test]
    fn need_compare_degenerates_to_conflict_when_indistinguishable() {
        let l = file("c.txt", 5, 1000.0);
        let r = file("c.txt", 7, 1000.0);
        let pair = EntryPair {
            local: Some(l),
            remote: Some(r),
            local_label: Classification::Existing,
            remote_label: Classification::Existing,
            operation: Operation::NeedCompare,
        };
        assert_eq!(resolve_need_compare(&pair, 2.0), Operation::Conflict);
    }

    #[test]
    fn need_compare_prefers_newer_mtime() {
        let l = file("c.txt", 5, 3000.0);
        let r = file("c.txt", 7, 1000.0);
        let pair = EntryPair {
            local: Some(l),
            remote: Some(r),
            local_label: Classification::Existing,
            remote_label: Classification::Existing,
            operation: Operation::NeedCompare,
        };
        assert_eq!(resolve_need_compare(&pair, 2.0), Operation::CopyLocal);
    }
}
