//! Conflict resolution: strategy selection and the interactive resolver.
//!
//! Kept behind a trait so the engine has no direct terminal dependency and
//! can be driven headlessly in tests (see the `DESIGN.md` note on keeping
//! prompts out of the engine).

use async_trait::async_trait;
use clap::ValueEnum;

use crate::entry::EntryPair;

/// `--resolve` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolveStrategy {
    /// Keep the local copy.
    Local,
    /// Keep the remote copy.
    Remote,
    /// Keep whichever side has the older mtime.
    #[value(name = "old")]
    Older,
    /// Keep whichever side has the newer mtime.
    #[value(name = "new")]
    Newer,
    /// Ask interactively.
    Ask,
    /// Leave the conflict untouched.
    Skip,
}

/// What the resolver decided for one conflicting pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Re-push the local copy to the remote (or delete the remote copy if
    /// the local side is absent).
    Local,
    /// Symmetric to [`Outcome::Local`] with sides swapped.
    Remote,
    /// Leave both sides untouched.
    Skip,
}

/// Resolves one conflicting pair to an [`Outcome`]. Implementations may be
/// purely deterministic (a fixed strategy) or interactive (prompting a
/// human, with a "apply to all" sticky choice).
#[async_trait]
pub trait ConflictResolver: Send {
    /// Resolves `pair`, whose operation has already been determined to be
    /// [`crate::entry::Operation::Conflict`].
    async fn resolve(&mut self, pair: &EntryPair, mtime_eps: f64) -> Outcome;
}

/// A resolver that always returns the same, pre-selected strategy: used
/// for every `--resolve` value except `ask`.
pub struct FixedResolver {
    strategy: ResolveStrategy,
}

impl FixedResolver {
    /// Builds a resolver that always applies `strategy`.
    #[must_use]
    pub const fn new(strategy: ResolveStrategy) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl ConflictResolver for FixedResolver {
    async fn resolve(&mut self, pair: &EntryPair, mtime_eps: f64) -> Outcome {
        strategy_outcome(self.strategy, pair, mtime_eps)
    }
}

/// Resolves one strategy against one pair, without any interactivity.
/// `older`/`newer` degenerate to `skip` when the two mtimes are within
/// `mtime_eps` of each other (there's no meaningfully "older" side).
#[must_use]
pub fn strategy_outcome(strategy: ResolveStrategy, pair: &EntryPair, mtime_eps: f64) -> Outcome {
    match strategy {
        ResolveStrategy::Local => Outcome::Local,
        ResolveStrategy::Remote => Outcome::Remote,
        ResolveStrategy::Skip | ResolveStrategy::Ask => Outcome::Skip,
        ResolveStrategy::Older | ResolveStrategy::Newer => {
            let Some(l) = &pair.local else { return Outcome::Remote };
            let Some(r) = &pair.remote else { return Outcome::Local };
            if (l.mtime - r.mtime).abs() <= mtime_eps {
                return Outcome::Skip;
            }
            let local_is_older = l.mtime < r.mtime;
            match (strategy, local_is_older) {
                (ResolveStrategy::Older, true) | (ResolveStrategy::Newer, false) => Outcome::Local,
                _ => Outcome::Remote,
            }
        }
    }
}

/// Prompts on the terminal for each conflict, with a sticky "apply to all
/// remaining" choice once the user picks one.
pub struct InteractiveResolver<R: crate::report::Reporter> {
    reporter: R,
    sticky: Option<Outcome>,
}

impl<R: crate::report::Reporter> InteractiveResolver<R> {
    /// Builds an interactive resolver backed by `reporter` for prompting.
    pub const fn new(reporter: R) -> Self {
        Self { reporter, sticky: None }
    }
}

#[async_trait]
impl<R: crate::report::Reporter + Send> ConflictResolver for InteractiveResolver<R> {
    async fn resolve(&mut self, pair: &EntryPair, _mtime_eps: f64) -> Outcome {
        if let Some(outcome) = self.sticky {
            return outcome;
        }
        let (outcome, apply_to_all) = self.reporter.prompt_conflict(pair.name()).await;
        if apply_to_all {
            self.sticky = Some(outcome);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, EntryKind, Classification, Operation};

    fn pair(local_mtime: f64, remote_mtime: f64) -> EntryPair {
        let mk = |mtime: f64| Entry {
            kind: EntryKind::File,
            name: "c.txt".into(),
            size: 5,
            mtime,
            unique: None,
            encoding_fallback: false,
        };
        EntryPair {
            local: Some(mk(local_mtime)),
            remote: Some(mk(remote_mtime)),
            local_label: Classification::Modified,
            remote_label: Classification::Modified,
            operation: Operation::Conflict,
        }
    }

    #[test]
    fn resolve_new_picks_newer_side() {
        let p = pair(2000.0, 3000.0);
        assert_eq!(strategy_outcome(ResolveStrategy::Newer, &p, 2.0), Outcome::Remote);
    }

    #[test]
    fn resolve_old_picks_older_side() {
        let p = pair(2000.0, 3000.0);
        assert_eq!(strategy_outcome(ResolveStrategy::Older, &p, 2.0), Outcome::Local);
    }

    #[test]
    fn resolve_degenerates_to_skip_within_eps() {
        let p = pair(2000.0, 2001.0);
        assert_eq!(strategy_outcome(ResolveStrategy::Newer, &p, 2.0), Outcome::Skip);
        assert_eq!(strategy_outcome(ResolveStrategy::Older, &p, 2.0), Outcome::Skip);
    }

    #[test]
    fn resolve_local_and_remote_are_unconditional() {
        let p = pair(1.0, 1.0);
        assert_eq!(strategy_outcome(ResolveStrategy::Local, &p, 2.0), Outcome::Local);
        assert_eq!(strategy_outcome(ResolveStrategy::Remote, &p, 2.0), Outcome::Remote);
    }
}
