//! Command-line argument surface.
//!
//! Grouped into small `#[command(flatten)]` structs, one per ambient
//! concern (paths, mode, filtering, conflict handling, output, connection,
//! credentials) rather than one flat list of fields.

use std::path::PathBuf;

use clap::{ArgAction, Args as ClapArgs, Parser};

use crate::policy::SyncMode;
use crate::resolve::ResolveStrategy;

/// Case-sensitivity policy for pairing local and remote names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CaseMode {
    /// Names must match exactly; same-folded names coexist as distinct
    /// entries.
    Strict,
    /// On a case-insensitive collision, the local spelling wins.
    Local,
    /// On a case-insensitive collision, the remote spelling wins.
    Remote,
}

/// Paths to synchronize.
#[derive(Debug, ClapArgs)]
pub struct PathArgs {
    /// Local directory to synchronize.
    pub local: PathBuf,

    /// Remote URL (`ftp://`, `ftps://`, or `sftp://`), including path.
    pub remote: String,
}

/// Which direction to synchronize in.
#[derive(Debug, ClapArgs)]
pub struct ModeArgs {
    /// Synchronization direction.
    #[arg(long, value_enum, default_value_t = SyncMode::Bidirectional)]
    pub mode: SyncMode,

    /// Collapse any disagreement towards the writable side instead of
    /// leaving it for classification/conflict handling.
    #[arg(long)]
    pub force: bool,
}

/// Which entries participate in the sync.
#[derive(Debug, ClapArgs)]
pub struct FilterArgs {
    /// Glob patterns a file must match to be synced (applies to files
    /// only; directories are always considered).
    #[arg(long = "match", value_delimiter = ',')]
    pub match_glob: Vec<String>,

    /// Glob patterns excluding entries from the sync, applied to files and
    /// directories.
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// How to treat case-insensitive name collisions between the two
    /// sides.
    #[arg(long, value_enum, default_value_t = CaseMode::Strict)]
    pub case: CaseMode,
}

/// How conflicts and deletions are handled.
#[derive(Debug, ClapArgs)]
pub struct ConflictArgs {
    /// Strategy for resolving a `conflict` pair.
    #[arg(long, value_enum, default_value_t = ResolveStrategy::Ask)]
    pub resolve: ResolveStrategy,

    /// Allow deletions to propagate from the source side to the
    /// destination side in upload/download mode.
    #[arg(long)]
    pub delete: bool,

    /// Delete destination-only entries that have no local counterpart at
    /// all, even if they were never seen before.
    #[arg(long)]
    pub delete_unmatched: bool,

    /// Log and count copy errors instead of aborting the run.
    #[arg(long)]
    pub ignore_copy_errors: bool,
}

/// Logging, progress, and dry-run behavior.
#[derive(Debug, ClapArgs)]
pub struct OutputArgs {
    /// Compute and report what would happen without performing any
    /// mutating operation.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase logging verbosity; may be repeated (e.g. `-vvv`).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Render a redrawn progress line when attached to a terminal.
    #[arg(long, default_value_t = true)]
    pub progress: bool,

    /// Disable ANSI colour in output, even on a TTY.
    #[arg(long)]
    pub no_color: bool,
}

/// Connection-level behavior for the remote target.
#[derive(Debug, ClapArgs)]
pub struct ConnectionArgs {
    /// Use active-mode FTP data connections instead of passive mode.
    #[arg(long)]
    pub ftp_active: bool,

    /// Log raw FTP protocol traffic.
    #[arg(long)]
    pub ftp_debug: bool,

    /// Skip SFTP host key verification (insecure; for disposable test
    /// servers only).
    #[arg(long)]
    pub no_verify_host_keys: bool,

    /// Per-operation socket timeout, in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Break a lock file left by a previous session if it is older than a
    /// threshold.
    #[arg(long)]
    pub break_existing_lock: bool,

    /// Create the remote (or local) root directory if it does not exist.
    #[arg(long)]
    pub create_folder: bool,
}

/// Credential handling.
#[derive(Debug, ClapArgs)]
pub struct CredentialArgs {
    /// Save the password in the platform keyring after a successful
    /// connection.
    #[arg(long)]
    pub store_password: bool,

    /// Never prompt interactively; fail instead of asking for a missing
    /// password or a conflict resolution.
    #[arg(long)]
    pub no_prompt: bool,

    /// Username to authenticate with (defaults to the URL's userinfo, if
    /// present).
    #[arg(long)]
    pub username: Option<String>,

    /// Private key file for SFTP public-key authentication.
    #[arg(long)]
    pub key_file: Option<PathBuf>,
}

/// Full command-line surface.
#[derive(Debug, Parser)]
#[command(name = "ftpsync", version, about = "Synchronize a local directory with an FTP/FTPS/SFTP server")]
pub struct Cli {
    #[command(flatten)]
    pub paths: PathArgs,

    #[command(flatten)]
    pub mode: ModeArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub conflict: ConflictArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Path to a TOML config file; defaults to the platform config
    /// directory (see [`crate::config::FileConfig::default_path`]).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Cross-field validation `clap` cannot express declaratively.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message describing the first invalid
    /// combination found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.output.quiet && self.output.verbose > 0 {
            anyhow::bail!("--quiet and --verbose are mutually exclusive");
        }
        if self.conflict.resolve == ResolveStrategy::Ask && self.credentials.no_prompt {
            anyhow::bail!("--resolve ask requires interactive prompting; pass --no-prompt with a concrete --resolve value");
        }
        if self.mode.mode != SyncMode::Bidirectional && matches!(self.conflict.resolve, ResolveStrategy::Older | ResolveStrategy::Newer) {
            anyhow::bail!("--resolve old/new only apply in bidirectional mode");
        }
        Ok(())
    }

    /// Effective verbosity after folding in `--quiet`.
    #[must_use]
    pub const fn effective_verbosity(&self) -> u8 {
        if self.output.quiet { 0 } else { self.output.verbose }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn parses_minimal_invocation() {
        let cli = parse(&["ftpsync", "/tmp/local", "ftp://example.com/remote"]);
        assert_eq!(cli.paths.local, PathBuf::from("/tmp/local"));
        assert_eq!(cli.paths.remote, "ftp://example.com/remote");
        assert_eq!(cli.mode.mode, SyncMode::Bidirectional);
        assert!(!cli.output.dry_run);
    }

    #[test]
    fn rejects_quiet_and_verbose_together() {
        let cli = parse(&["ftpsync", "/tmp/local", "ftp://example.com/remote", "-q", "-v"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn rejects_ask_with_no_prompt() {
        let cli = parse(&[
            "ftpsync",
            "/tmp/local",
            "ftp://example.com/remote",
            "--resolve",
            "ask",
            "--no-prompt",
        ]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn accepts_force_and_delete_flags() {
        let cli = parse(&[
            "ftpsync",
            "/tmp/local",
            "sftp://example.com/remote",
            "--mode",
            "upload",
            "--force",
            "--delete",
        ]);
        assert!(cli.mode.force);
        assert!(cli.conflict.delete);
        assert!(cli.validate().is_ok());
    }
}
