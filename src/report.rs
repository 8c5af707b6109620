//! Logging and progress: the only surface the engine is allowed to call
//! for user-facing output.
//!
//! Keeping this behind a trait is what lets the interactive conflict
//! resolver (`resolve.rs`) and the engine itself run headlessly in tests —
//! neither ever touches a terminal directly.

use async_trait::async_trait;

use crate::entry::Operation;
use crate::resolve::Outcome;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// User-facing output sink. One implementation renders to a terminal with
/// `indicatif`/`console`; another is silent (used under `--quiet` and in
/// tests).
#[async_trait]
pub trait Reporter: Send {
    /// Called once per directory the engine enters.
    fn enter_dir(&mut self, path: &std::path::Path);

    /// Called once a pair's final operation has been dispatched.
    fn entry_done(&mut self, name: &str, operation: Operation);

    /// Called when a recoverable error occurs during a copy and
    /// `ignore_copy_errors` lets the traversal continue.
    fn warn(&mut self, message: &str);

    /// Prompts the user to resolve a conflict on `name`, returning the
    /// chosen outcome and whether it should stick for the rest of the run.
    /// Implementations that can't reach a human (no TTY, `--quiet`) should
    /// return `(Outcome::Skip, false)` rather than block.
    async fn prompt_conflict(&mut self, name: &str) -> (Outcome, bool);

    /// Advances the overall progress indicator by one completed entry.
    fn tick(&mut self) {}

    /// Called once the run has finished, with final counts.
    fn finished(&mut self, stats: &crate::stats::SyncStats);
}

/// Renders progress and log lines to the terminal, using a carriage-return
/// refreshed line when attached to a TTY.
pub struct TerminalReporter {
    bar: Option<ProgressBar>,
    verbose: u8,
    color: bool,
}

impl TerminalReporter {
    /// Builds a terminal reporter. `progress` enables the redrawn progress
    /// line; `verbose` gates how much detail `entry_done` logs.
    #[must_use]
    pub fn new(progress: bool, verbose: u8, color: bool) -> Self {
        let bar = progress.then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
                bar.set_style(style);
            }
            bar
        });
        Self { bar, verbose, color }
    }

    fn paint(&self, text: &str, color_code: u8) -> String {
        if self.color {
            style(text).color256(color_code).to_string()
        } else {
            text.to_string()
        }
    }
}

#[async_trait]
impl Reporter for TerminalReporter {
    fn enter_dir(&mut self, path: &std::path::Path) {
        if self.verbose >= 2 {
            tracing::info!(dir = %path.display(), "entering directory");
        }
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{}", path.display()));
        }
    }

    fn entry_done(&mut self, name: &str, operation: Operation) {
        if self.verbose >= 1 {
            let symbol = match operation {
                Operation::Equal => "=",
                Operation::CopyLocal => ">",
                Operation::CopyRemote => "<",
                Operation::DeleteLocal | Operation::DeleteRemote => "-",
                Operation::NeedCompare => "?",
                Operation::Conflict => "!",
            };
            let label = self.paint(symbol, match operation {
                Operation::CopyLocal => 2,
                Operation::CopyRemote => 4,
                Operation::DeleteLocal | Operation::DeleteRemote => 1,
                Operation::Conflict => 3,
                _ => 7,
            });
            tracing::info!(%name, %label, "synced entry");
        }
        self.tick();
    }

    fn warn(&mut self, message: &str) {
        tracing::warn!("{message}");
    }

    async fn prompt_conflict(&mut self, name: &str) -> (Outcome, bool) {
        if let Some(bar) = &self.bar {
            bar.suspend(|| ());
        }
        let prompt =
            format!("conflict: {name} — keep [l]ocal/[r]emote, [s]kip, or apply to all remaining (L/R/S)? ");
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            eprint!("{prompt}");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return (Outcome::Skip, false);
            }
            match line.trim() {
                "l" => (Outcome::Local, false),
                "L" => (Outcome::Local, true),
                "r" => (Outcome::Remote, false),
                "R" => (Outcome::Remote, true),
                "S" => (Outcome::Skip, true),
                _ => (Outcome::Skip, false),
            }
        })
        .await
        .unwrap_or((Outcome::Skip, false))
    }

    fn tick(&mut self) {
        if let Some(bar) = &self.bar {
            bar.tick();
        }
    }

    fn finished(&mut self, stats: &crate::stats::SyncStats) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        tracing::info!(
            uploaded = stats.files_uploaded,
            downloaded = stats.files_downloaded,
            deleted = stats.files_deleted,
            conflicts = stats.conflicts,
            errors = stats.errors,
            "sync finished"
        );
    }
}

/// A reporter that drops every event; used under `--quiet` and in tests
/// that exercise the engine without a terminal.
#[derive(Default)]
pub struct SilentReporter;

#[async_trait]
impl Reporter for SilentReporter {
    fn enter_dir(&mut self, _path: &std::path::Path) {}
    fn entry_done(&mut self, _name: &str, _operation: Operation) {}
    fn warn(&mut self, _message: &str) {}
    async fn prompt_conflict(&mut self, _name: &str) -> (Outcome, bool) {
        (Outcome::Skip, false)
    }
    fn finished(&mut self, _stats: &crate::stats::SyncStats) {}
}
