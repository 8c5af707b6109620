//! End-to-end scenarios exercising the synchronizer engine against two
//! local directories (one standing in for "remote"), rooted in
//! `tempfile::TempDir`s.
//!
//! These cover the six concrete scenarios and the dry-run/idempotency
//! invariants from the design notes, without requiring a live FTP/SFTP
//! server.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ftpsync::backends::local::LocalTarget;
use ftpsync::engine::{EngineOptions, FilterConfig, Synchronizer};
use ftpsync::policy::{ModePolicy, SyncMode};
use ftpsync::report::SilentReporter;
use ftpsync::resolve::{FixedResolver, ResolveStrategy};
use ftpsync::target::{Target, TargetFlags};

fn now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64()
}

fn local_target(root: PathBuf, readonly: bool, dry_run: bool) -> Box<dyn Target> {
    Box::new(LocalTarget::new(root, TargetFlags { readonly, dry_run }, true))
}

fn build(
    local_root: PathBuf,
    remote_root: PathBuf,
    mode: SyncMode,
    resolve: ResolveStrategy,
    dry_run: bool,
    delete: bool,
) -> Synchronizer {
    let policy = ModePolicy::new(mode, delete, false);
    let local = local_target(local_root, policy.local_readonly, dry_run);
    let remote = local_target(remote_root, policy.remote_readonly, dry_run);
    Synchronizer::new(
        local,
        remote,
        policy,
        Box::new(FixedResolver::new(resolve)),
        Box::new(SilentReporter),
        FilterConfig::default(),
        EngineOptions::default(),
    )
}

#[tokio::test]
async fn new_file_upload() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    std::fs::write(local_dir.path().join("a.txt"), b"abc").unwrap();

    let mut sync = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Upload,
        ResolveStrategy::Skip,
        false,
        false,
    );
    let stats = sync.run().await.unwrap();

    assert_eq!(stats.files_uploaded, 1);
    assert_eq!(stats.bytes_transferred, 3);
    assert!(remote_dir.path().join("a.txt").exists());
    assert_eq!(std::fs::read(remote_dir.path().join("a.txt")).unwrap(), b"abc");
}

#[tokio::test]
async fn downstream_deletion_propagates_locally() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    std::fs::write(local_dir.path().join("b.txt"), b"old").unwrap();

    // First run establishes metadata on both sides recording b.txt.
    let mut first = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Bidirectional,
        ResolveStrategy::Skip,
        false,
        false,
    );
    first.run().await.unwrap();
    assert!(remote_dir.path().join("b.txt").exists());

    // Remote now lacks it (simulating an out-of-band deletion there).
    std::fs::remove_file(remote_dir.path().join("b.txt")).unwrap();

    let mut second = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Bidirectional,
        ResolveStrategy::Skip,
        false,
        false,
    );
    let stats = second.run().await.unwrap();

    assert_eq!(stats.files_deleted, 1);
    assert!(!local_dir.path().join("b.txt").exists());
}

#[tokio::test]
async fn conflict_resolve_new_keeps_newer_side() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();

    std::fs::write(local_dir.path().join("c.txt"), b"local-version").unwrap();
    std::fs::write(remote_dir.path().join("c.txt"), b"remote-version-newer").unwrap();
    let t = now();
    filetime::set_file_mtime(local_dir.path().join("c.txt"), filetime::FileTime::from_unix_time(t as i64 - 1000, 0)).unwrap();
    filetime::set_file_mtime(remote_dir.path().join("c.txt"), filetime::FileTime::from_unix_time(t as i64, 0)).unwrap();

    let mut sync = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Bidirectional,
        ResolveStrategy::Newer,
        false,
        false,
    );
    sync.run().await.unwrap();

    assert_eq!(std::fs::read(local_dir.path().join("c.txt")).unwrap(), b"remote-version-newer");
}

#[tokio::test]
async fn dry_run_upload_performs_no_mutation() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    std::fs::write(local_dir.path().join("a.txt"), b"abc").unwrap();

    let mut sync = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Upload,
        ResolveStrategy::Skip,
        true,
        false,
    );
    let stats = sync.run().await.unwrap();

    assert!(!remote_dir.path().join("a.txt").exists());
    assert_eq!(stats.entries_touched, 1);
    assert_eq!(stats.bytes_transferred, 0);
}

#[tokio::test]
async fn second_run_on_unchanged_tree_is_idempotent() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    std::fs::write(local_dir.path().join("a.txt"), b"abc").unwrap();
    std::fs::create_dir(local_dir.path().join("sub")).unwrap();
    std::fs::write(local_dir.path().join("sub").join("b.txt"), b"xyz").unwrap();

    let mut first = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Bidirectional,
        ResolveStrategy::Skip,
        false,
        false,
    );
    first.run().await.unwrap();

    let mut second = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Bidirectional,
        ResolveStrategy::Skip,
        false,
        false,
    );
    let stats = second.run().await.unwrap();

    assert!(stats.is_no_op(), "second run should be a pure no-op: {stats:?}");
}

#[tokio::test]
async fn metadata_and_lock_files_never_appear_as_entries() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    std::fs::write(local_dir.path().join("a.txt"), b"abc").unwrap();

    let mut sync = build(
        local_dir.path().to_path_buf(),
        remote_dir.path().to_path_buf(),
        SyncMode::Bidirectional,
        ResolveStrategy::Skip,
        false,
        false,
    );
    sync.run().await.unwrap();

    let mut local = LocalTarget::new(local_dir.path().to_path_buf(), TargetFlags::default(), false);
    local.open().await.unwrap();
    let entries = local.get_dir().await.unwrap();
    assert!(entries.iter().all(|e| e.name != ftpsync::dirmeta::META_FILE_NAME));
    assert!(entries.iter().all(|e| e.name != ftpsync::dirmeta::LOCK_FILE_NAME));
}
