//! The synchronizer engine: directory traversal, pairing, classification
//! dispatch, and metadata flush.
//!
//! The engine is single-threaded and strictly sequential (see §5 of the
//! design notes carried in `DESIGN.md`): every `Target` method is a
//! suspension point, but none are ever awaited concurrently with another.
//! `async`/`.await` here is purely the vocabulary for "this suspends", not
//! a concurrency mechanism — there is no `tokio::spawn`, no `join!`,
//! anywhere in this module.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use glob::Pattern;

use crate::classify::{classify_pair, resolve_need_compare};
use crate::dirmeta::DirMetadata;
use crate::entry::{Entry, EntryKind, EntryPair, Operation};
use crate::error::{Result, SyncError};
use crate::policy::ModePolicy;
use crate::report::Reporter;
use crate::resolve::{ConflictResolver, Outcome};
use crate::stats::SyncStats;
use crate::target::Target;

/// Which entries participate in a sync, and how name collisions are
/// resolved.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Glob patterns a file must match (files only; empty means "all").
    pub match_glob: Vec<String>,
    /// Glob patterns that exclude an entry, files and directories alike.
    pub exclude: Vec<String>,
    /// Case-collision policy.
    pub case: CasePolicy,
}

/// Case-sensitivity policy for pairing local and remote names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CasePolicy {
    /// Case-insensitively identical names on both sides are still distinct
    /// entries.
    #[default]
    Strict,
    /// On a fold collision, use the local spelling.
    Local,
    /// On a fold collision, use the remote spelling.
    Remote,
}

impl FilterConfig {
    fn included(&self, entry: &Entry) -> bool {
        if Entry::is_always_omitted(&entry.name) {
            return false;
        }
        if self.exclude.iter().any(|p| Pattern::new(p).is_ok_and(|g| g.matches(&entry.name))) {
            return false;
        }
        if !entry.is_dir() && !self.match_glob.is_empty() {
            return self.match_glob.iter().any(|p| Pattern::new(p).is_ok_and(|g| g.matches(&entry.name)));
        }
        true
    }
}

/// Behavior flags threaded through every directory visited.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Log and count copy errors instead of aborting.
    pub ignore_copy_errors: bool,
}

/// Drives one full synchronization between a local and a remote target.
///
/// Holds its targets, resolver, and reporter as trait objects rather than
/// generic parameters: the concrete backend (local filesystem, FTP, SFTP)
/// and resolver (fixed strategy, interactive) are chosen at runtime from
/// CLI flags, not known at compile time (see `main.rs`).
pub struct Synchronizer {
    local: Box<dyn Target>,
    remote: Box<dyn Target>,
    policy: ModePolicy,
    resolver: Box<dyn ConflictResolver>,
    reporter: Box<dyn Reporter>,
    filter: FilterConfig,
    options: EngineOptions,
    stats: SyncStats,
}

impl Synchronizer {
    /// Builds a synchronizer ready to run against two already-constructed
    /// (but not yet opened) targets.
    pub fn new(
        local: Box<dyn Target>,
        remote: Box<dyn Target>,
        policy: ModePolicy,
        resolver: Box<dyn ConflictResolver>,
        reporter: Box<dyn Reporter>,
        filter: FilterConfig,
        options: EngineOptions,
    ) -> Self {
        Self { local, remote, policy, resolver, reporter, filter, options, stats: SyncStats::default() }
    }

    /// Runs the full synchronization: opens both targets, recurses from
    /// the root, and closes both targets on every exit path (success,
    /// error, or interruption).
    ///
    /// # Errors
    ///
    /// Propagates any fatal error from classification, metadata handling,
    /// or a non-recoverable backend failure. `close()` is still called on
    /// both targets before the error is returned.
    pub async fn run(&mut self) -> Result<SyncStats> {
        let open_result = async {
            self.local.open().await?;
            self.remote.open().await?;
            Ok::<_, SyncError>(())
        }
        .await;

        if let Err(e) = open_result {
            let _ = self.local.close().await;
            let _ = self.remote.close().await;
            return Err(e);
        }

        let run_result = self.sync_dir().await;

        let local_close = self.local.close().await;
        let remote_close = self.remote.close().await;

        run_result?;
        local_close?;
        remote_close?;

        self.reporter.finished(&self.stats);
        Ok(self.stats)
    }

    /// Synchronizes the current directory and recurses into matching
    /// subdirectories. Boxed manually since async fns cannot recurse
    /// directly.
    fn sync_dir<'a>(&'a mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.reporter.enter_dir(self.local.cur_dir());

            let local_entries = self.local.get_dir().await?;
            let remote_entries = self.remote.get_dir().await?;

            let pairs = self.pair_entries(local_entries, remote_entries)?;
            let eps = self.local.mtime_eps().0.max(self.remote.mtime_eps().0);

            let mut to_descend = Vec::new();

            for mut pair in pairs {
                self.stats.entries_touched += 1;

                if pair.operation == Operation::NeedCompare {
                    pair.operation = resolve_need_compare(&pair, eps);
                }
                if let Some(overridden) = self.policy.reclassify(&pair) {
                    pair.operation = overridden;
                }
                if pair.operation == Operation::Conflict {
                    pair.operation = match self.resolver.resolve(&pair, eps).await {
                        Outcome::Local => if pair.remote.is_some() { Operation::CopyLocal } else { Operation::DeleteRemote },
                        Outcome::Remote => if pair.local.is_some() { Operation::CopyRemote } else { Operation::DeleteLocal },
                        Outcome::Skip => Operation::Equal,
                    };
                    if pair.operation != Operation::Equal {
                        self.stats.conflicts += 1;
                    }
                }

                let is_dir = pair.is_dir();
                let descend_ok = self.dispatch(&pair).await?;
                self.reporter.entry_done(pair.name(), pair.operation);

                if is_dir && descend_ok {
                    to_descend.push(pair.name().to_string());
                }
            }

            self.local.flush_meta().await?;
            self.remote.flush_meta().await?;

            for name in to_descend {
                self.local.cwd(&name).await?;
                self.remote.cwd(&name).await?;
                self.local.push_meta(DirMetadata::default());
                self.remote.push_meta(DirMetadata::default());

                self.sync_dir().await?;

                self.local.pop_meta();
                self.remote.pop_meta();
                self.local.cwd("..").await?;
                self.remote.cwd("..").await?;
            }

            Ok(())
        })
    }

    /// Pairs every local entry with its case-matched remote counterpart
    /// (or `None`), then every unmatched remote entry with `None`, then
    /// classifies each pair.
    fn pair_entries(&mut self, local: Vec<Entry>, remote: Vec<Entry>) -> Result<Vec<EntryPair>> {
        let local: Vec<Entry> = local.into_iter().filter(|e| self.filter.included(e)).collect();
        let remote: Vec<Entry> = remote.into_iter().filter(|e| self.filter.included(e)).collect();

        let mut remote_by_name: BTreeMap<String, Entry> = BTreeMap::new();
        let mut remote_by_fold: BTreeMap<String, String> = BTreeMap::new();
        for e in remote {
            let fold = e.name.to_lowercase();
            if self.filter.case != CasePolicy::Strict {
                remote_by_fold.insert(fold, e.name.clone());
            }
            remote_by_name.insert(e.name.clone(), e);
        }

        let mut pairs = Vec::new();
        let mut matched_remote_names = std::collections::BTreeSet::new();

        for l in local {
            let remote_match_name = if self.filter.case == CasePolicy::Strict {
                remote_by_name.contains_key(&l.name).then(|| l.name.clone())
            } else {
                let fold = l.name.to_lowercase();
                remote_by_fold.get(&fold).cloned()
            };

            let remote_entry = remote_match_name.as_ref().and_then(|n| remote_by_name.get(n)).cloned();
            if let Some(n) = &remote_match_name {
                matched_remote_names.insert(n.clone());
            }

            let canonical_remote = match (self.filter.case, remote_entry) {
                (CasePolicy::Local, Some(mut r)) => {
                    r.name = l.name.clone();
                    Some(r)
                }
                (_, r) => r,
            };

            let pair = classify_pair(Some(l), canonical_remote, self.local.mtime_eps().0, self.local.meta(), self.remote.meta());
            pairs.push(pair);
        }

        for (name, e) in remote_by_name {
            if matched_remote_names.contains(&name) {
                continue;
            }
            let pair = classify_pair(None, Some(e), self.remote.mtime_eps().0, self.local.meta(), self.remote.meta());
            pairs.push(pair);
        }

        Ok(pairs)
    }

    /// Dispatches the final operation for one pair. Returns `true` if the
    /// engine should descend into this pair's subdirectory (i.e. it was
    /// not deleted by this dispatch).
    async fn dispatch(&mut self, pair: &EntryPair) -> Result<bool> {
        match pair.operation {
            Operation::Equal | Operation::NeedCompare => Ok(true),
            Operation::CopyLocal => self.copy(pair, true).await,
            Operation::CopyRemote => self.copy(pair, false).await,
            Operation::DeleteLocal => self.delete(pair, true).await,
            Operation::DeleteRemote => self.delete(pair, false).await,
            Operation::Conflict => Ok(true), // only reached if resolver returned Equal above
        }
    }

    /// Copies a pair from local to remote (`to_remote = true`) or vice
    /// versa, updating both sides' metadata and mirroring the peer view.
    async fn copy(&mut self, pair: &EntryPair, to_remote: bool) -> Result<bool> {
        if pair.is_dir() {
            return self.copy_dir(pair, to_remote).await;
        }
        let name = pair.name();
        let now = now_secs();

        let result: Result<(f64, u64)> = async {
            if to_remote {
                let mut src = self.local.open_readable(name).await?;
                let mtime = pair.local.as_ref().map_or(now, |e| e.mtime);
                let written = self.remote.write_file(name, &mut src, Some(mtime), &mut |_| {}).await?;
                Ok((mtime, written))
            } else {
                let mut src = self.remote.open_readable(name).await?;
                let mtime = pair.remote.as_ref().map_or(now, |e| e.mtime);
                let written = self.local.write_file(name, &mut src, Some(mtime), &mut |_| {}).await?;
                Ok((mtime, written))
            }
        }
        .await;

        match result {
            Ok((mtime, written)) => {
                self.local.set_sync_info(name, mtime, written, now);
                self.remote.set_sync_info(name, mtime, written, now);
                let record = crate::dirmeta::FileRecord { s: written, m: mtime, u: now };
                self.local.meta_mut().mirror_peer(self.remote.get_id(), name, record);
                self.remote.meta_mut().mirror_peer(self.local.get_id(), name, record);
                self.stats.bytes_transferred += written;
                if to_remote {
                    self.stats.files_uploaded += 1;
                } else {
                    self.stats.files_downloaded += 1;
                }
                Ok(true)
            }
            Err(e) if self.options.ignore_copy_errors && e.is_recoverable_copy_error() => {
                self.stats.errors += 1;
                self.reporter.warn(&format!("copy failed for {name}: {e}"));
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Creates the destination directory (if missing), pushes a fresh
    /// metadata scope on both sides, then returns `true` so the caller
    /// descends to copy children.
    async fn copy_dir(&mut self, pair: &EntryPair, to_remote: bool) -> Result<bool> {
        let name = pair.name();
        if to_remote {
            self.remote.mkdir(name).await?;
        } else {
            self.local.mkdir(name).await?;
        }
        self.stats.directories_created += 1;
        Ok(true)
    }

    /// Deletes a pair from local (`from_local = true`) or remote, clearing
    /// its metadata record on both sides. Directory deletions empty the
    /// directory first (see [`empty_dir`]): FTP and SFTP `rmdir` both
    /// reject a non-empty directory.
    async fn delete(&mut self, pair: &EntryPair, from_local: bool) -> Result<bool> {
        let name = pair.name();
        if pair.is_dir() {
            if from_local {
                empty_dir(self.local.as_mut(), name).await?;
                self.local.rmdir(name).await?;
            } else {
                empty_dir(self.remote.as_mut(), name).await?;
                self.remote.rmdir(name).await?;
            }
            self.stats.directories_deleted += 1;
            self.local.remove_sync_info(name);
            self.remote.remove_sync_info(name);
            return Ok(false);
        }

        let result = if from_local { self.local.remove_file(name).await } else { self.remote.remove_file(name).await };
        match result {
            Ok(()) => {
                self.local.remove_sync_info(name);
                self.remote.remove_sync_info(name);
                self.stats.files_deleted += 1;
                Ok(false)
            }
            Err(e) if self.options.ignore_copy_errors && e.is_recoverable_copy_error() => {
                self.stats.errors += 1;
                self.reporter.warn(&format!("delete failed for {name}: {e}"));
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

/// Current wall-clock time, seconds since the Unix epoch.
fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Recursively removes every child of `name` (a subdirectory of `target`'s
/// current directory), leaving `name` itself empty and ready for `rmdir`.
/// `LocalTarget::rmdir` already recurses on its own via `remove_dir_all`,
/// but the FTP and SFTP backends only remove empty directories, so the
/// engine has to walk the tree itself before calling `rmdir` on either
/// side of a directory deletion.
fn empty_dir<'a>(target: &'a mut dyn Target, name: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        target.cwd(name).await?;
        let children = target.get_dir().await?;
        for child in children {
            if child.kind == EntryKind::Directory {
                empty_dir(target, &child.name).await?;
                target.rmdir(&child.name).await?;
            } else {
                target.remove_file(&child.name).await?;
            }
        }
        target.cwd("..").await?;
        Ok(())
    })
}
