//! Binary entry point: parses CLI flags, layers them over the config
//! file, resolves credentials, constructs the two targets, and runs the
//! synchronizer to completion.

use std::path::PathBuf;

use clap::Parser;
use ftpsync::backends::ftp::{FtpConfig, FtpTarget};
use ftpsync::backends::local::LocalTarget;
use ftpsync::backends::sftp::{SftpConfig, SftpTarget};
use ftpsync::backends::RemoteUrl;
use ftpsync::cli::Cli;
use ftpsync::config::FileConfig;
use ftpsync::credentials;
use ftpsync::engine::{EngineOptions, FilterConfig, Synchronizer};
use ftpsync::policy::ModePolicy;
use ftpsync::report::{Reporter, SilentReporter, TerminalReporter};
use ftpsync::resolve::{ConflictResolver, FixedResolver, ResolveStrategy};
use ftpsync::target::{Target, TargetFlags};

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).without_time().finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.validate()?;
    init_tracing(cli.effective_verbosity());

    let config_path = cli.config.clone().or_else(FileConfig::default_path);
    let file_config = match config_path {
        Some(path) => FileConfig::load(&path)?,
        None => FileConfig::default(),
    };

    let url = RemoteUrl::parse(&cli.paths.remote).map_err(anyhow::Error::msg)?;

    let policy = ModePolicy::new(cli.mode.mode, cli.conflict.delete || cli.conflict.delete_unmatched, cli.mode.force);

    let local_flags = TargetFlags { readonly: policy.local_readonly, dry_run: cli.output.dry_run };
    let remote_flags = TargetFlags { readonly: policy.remote_readonly, dry_run: cli.output.dry_run };

    let local: Box<dyn Target> = Box::new(LocalTarget::new(cli.paths.local.clone(), local_flags, cli.connection.create_folder));

    let username = cli.credentials.username.clone().or_else(|| url.username.clone()).unwrap_or_else(whoami_fallback);
    let creds = credentials::resolve(username, cli.credentials.key_file.clone(), cli.credentials.no_prompt, &url.host)?;

    let remote: Box<dyn Target> = match url.scheme.as_str() {
        "ftp" | "ftps" => Box::new(FtpTarget::new(
            FtpConfig {
                host: url.host.clone(),
                port: url.port,
                username: creds.username.clone(),
                password: creds.password.clone().unwrap_or_default(),
                secure: url.scheme == "ftps",
                active_mode: cli.connection.ftp_active,
                debug: cli.connection.ftp_debug,
                timeout: std::time::Duration::from_secs(cli.connection.timeout_secs),
                break_existing_lock: cli.connection.break_existing_lock,
            },
            PathBuf::from(&url.path),
            remote_flags,
        )),
        "sftp" => Box::new(SftpTarget::new(
            SftpConfig {
                host: url.host.clone(),
                port: url.port,
                username: creds.username.clone(),
                password: creds.password.clone(),
                key_file: creds.key_file.clone(),
                verify_host_keys: !cli.connection.no_verify_host_keys,
                break_existing_lock: cli.connection.break_existing_lock,
            },
            PathBuf::from(&url.path),
            remote_flags,
        )),
        other => anyhow::bail!("unsupported scheme {other}"),
    };

    let resolve_strategy = file_config.resolve.map_or(cli.conflict.resolve, |r| {
        if cli.conflict.resolve == ResolveStrategy::Ask { r.into() } else { cli.conflict.resolve }
    });

    let resolver: Box<dyn ConflictResolver> = if resolve_strategy == ResolveStrategy::Ask {
        if cli.output.quiet || cli.credentials.no_prompt {
            Box::new(FixedResolver::new(ResolveStrategy::Skip))
        } else {
            Box::new(ftpsync::resolve::InteractiveResolver::new(TerminalReporter::new(
                cli.output.progress,
                cli.effective_verbosity(),
                !cli.output.no_color,
            )))
        }
    } else {
        Box::new(FixedResolver::new(resolve_strategy))
    };

    let reporter: Box<dyn Reporter> = if cli.output.quiet {
        Box::new(SilentReporter)
    } else {
        Box::new(TerminalReporter::new(cli.output.progress, cli.effective_verbosity(), !cli.output.no_color))
    };

    let mut match_glob = cli.filter.match_glob.clone();
    if match_glob.is_empty() {
        match_glob = file_config.match_glob.unwrap_or_default();
    }
    let mut exclude = cli.filter.exclude.clone();
    if exclude.is_empty() {
        exclude = file_config.exclude.unwrap_or_default();
    }

    let filter = FilterConfig {
        match_glob,
        exclude,
        case: match cli.filter.case {
            ftpsync::cli::CaseMode::Strict => ftpsync::engine::CasePolicy::Strict,
            ftpsync::cli::CaseMode::Local => ftpsync::engine::CasePolicy::Local,
            ftpsync::cli::CaseMode::Remote => ftpsync::engine::CasePolicy::Remote,
        },
    };

    let options = EngineOptions { ignore_copy_errors: cli.conflict.ignore_copy_errors };

    let mut synchronizer = Synchronizer::new(local, remote, policy, resolver, reporter, filter, options);
    let stats = synchronizer.run().await?;

    std::process::exit(stats.exit_code());
}

fn whoami_fallback() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string())
}
