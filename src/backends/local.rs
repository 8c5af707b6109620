//! Local filesystem backend.
//!
//! Root-jailed the same way the remote backends are, so the engine's
//! `PathEscape` contract does not depend on which side happens to be
//! local: every `cwd` target is checked against a canonicalized root
//! before it is accepted.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dirmeta::{DirMetadata, META_FILE_NAME};
use crate::entry::{Entry, EntryKind};
use crate::error::{Result, SyncError};
use crate::target::{guard_writable, merge_listing_entry, MtimeEps, ProgressCallback, ReadStream, Target, TargetFlags};

/// A [`Target`] backed by a directory on the local filesystem.
pub struct LocalTarget {
    root: PathBuf,
    cur: PathBuf,
    flags: TargetFlags,
    meta: DirMetadata,
    meta_stack: Vec<DirMetadata>,
    peer_id: String,
    create_if_missing: bool,
}

impl LocalTarget {
    /// Builds a target rooted at `root`. `root` need not exist yet if
    /// `create_if_missing` is set; otherwise `open` fails.
    #[must_use]
    pub fn new(root: PathBuf, flags: TargetFlags, create_if_missing: bool) -> Self {
        let peer_id = format!("local:{}", root.display());
        Self { cur: root.clone(), root, flags, meta: DirMetadata::default(), meta_stack: Vec::new(), peer_id, create_if_missing }
    }

    fn resolve_child(&self, name: &str) -> Result<PathBuf> {
        let candidate = if name == ".." {
            self.cur.parent().map_or_else(|| self.root.clone(), Path::to_path_buf)
        } else {
            self.cur.join(name)
        };
        let normalized = normalize(&candidate);
        let normalized_root = normalize(&self.root);
        if !normalized.starts_with(&normalized_root) {
            return Err(SyncError::PathEscape { root: self.root.clone(), attempted: candidate });
        }
        Ok(candidate)
    }

    fn meta_path(&self) -> PathBuf {
        self.cur.join(META_FILE_NAME)
    }
}

/// Lexically normalizes `path` (resolves `..` and `.` components without
/// touching the filesystem), since `root.canonicalize()` would fail for
/// children that don't exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[async_trait]
impl Target for LocalTarget {
    fn get_id(&self) -> &str {
        &self.peer_id
    }

    fn root_dir(&self) -> &Path {
        &self.root
    }

    fn cur_dir(&self) -> &Path {
        &self.cur
    }

    fn flags(&self) -> TargetFlags {
        self.flags
    }

    async fn open(&mut self) -> Result<()> {
        if !self.root.exists() {
            if self.create_if_missing {
                tokio::fs::create_dir_all(&self.root).await?;
            } else {
                return Err(SyncError::connect(
                    self.root.display().to_string(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "root directory does not exist"),
                ));
            }
        }
        self.cur = self.root.clone();
        self.meta = load_meta(&self.meta_path()).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn cwd(&mut self, name: &str) -> Result<()> {
        let target = self.resolve_child(name)?;
        self.cur = target;
        self.meta = load_meta(&self.meta_path()).await?;
        Ok(())
    }

    async fn mkdir(&mut self, name: &str) -> Result<()> {
        guard_writable(self.flags, "mkdir")?;
        let path = self.resolve_child(name)?;
        if !self.flags.dry_run {
            tokio::fs::create_dir_all(&path).await?;
        }
        Ok(())
    }

    async fn rmdir(&mut self, name: &str) -> Result<()> {
        guard_writable(self.flags, "rmdir")?;
        let path = self.resolve_child(name)?;
        if !self.flags.dry_run {
            tokio::fs::remove_dir_all(&path).await?;
        }
        Ok(())
    }

    async fn get_dir(&mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.cur).await?;
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if Entry::is_always_omitted(&name) {
                continue;
            }
            let metadata = dir_entry.metadata().await?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0.0, |d| d.as_secs_f64());
            let kind = if metadata.is_dir() { EntryKind::Directory } else { EntryKind::File };
            let entry = Entry {
                kind,
                name: name.clone(),
                size: if kind == EntryKind::Directory { 0 } else { metadata.len() },
                mtime,
                unique: None,
                encoding_fallback: false,
            };
            let merged = merge_listing_entry(entry, crate::dirmeta::DEFAULT_MTIME_EPS, self.meta.get(&name));
            entries.push(merged);
        }
        Ok(entries)
    }

    async fn open_readable(&mut self, name: &str) -> Result<ReadStream> {
        let path = self.resolve_child(name)?;
        let file = tokio::fs::File::open(&path).await?;
        Ok(Box::new(file))
    }

    async fn write_file(
        &mut self,
        name: &str,
        src: &mut (dyn AsyncRead + Unpin + Send),
        mtime: Option<f64>,
        progress: ProgressCallback<'_>,
    ) -> Result<u64> {
        guard_writable(self.flags, "write_file")?;
        let path = self.resolve_child(name)?;
        if self.flags.dry_run {
            return Ok(0);
        }
        let mut dest = tokio::fs::File::create(&path).await?;
        let written = copy_with_progress(src, &mut dest, progress).await?;
        if let Some(m) = mtime {
            let ft = filetime_from_secs(m);
            let path_owned = path.clone();
            tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path_owned, ft))
                .await
                .map_err(|e| SyncError::copy(name, std::io::Error::other(e)))??;
        }
        Ok(written)
    }

    async fn copy_to_file(
        &mut self,
        name: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
        progress: ProgressCallback<'_>,
    ) -> Result<()> {
        let path = self.resolve_child(name)?;
        let mut src = tokio::fs::File::open(&path).await?;
        copy_with_progress(&mut src, dest, progress).await?;
        Ok(())
    }

    async fn remove_file(&mut self, name: &str) -> Result<()> {
        guard_writable(self.flags, "remove_file")?;
        let path = self.resolve_child(name)?;
        if !self.flags.dry_run {
            tokio::fs::remove_file(&path).await?;
        }
        self.meta.remove(name);
        Ok(())
    }

    fn meta(&self) -> &DirMetadata {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DirMetadata {
        &mut self.meta
    }

    fn push_meta(&mut self, meta: DirMetadata) {
        self.meta_stack.push(std::mem::replace(&mut self.meta, meta));
    }

    fn pop_meta(&mut self) -> Option<DirMetadata> {
        let popped = std::mem::replace(&mut self.meta, self.meta_stack.pop().unwrap_or_default());
        Some(popped)
    }

    async fn flush_meta(&mut self) -> Result<()> {
        if !self.meta.is_dirty() || self.flags.dry_run || self.flags.readonly {
            return Ok(());
        }
        let bytes = self.meta.to_json()?;
        tokio::fs::write(self.meta_path(), bytes).await?;
        self.meta.mark_clean();
        Ok(())
    }
}

async fn load_meta(path: &Path) -> Result<DirMetadata> {
    match tokio::fs::read(path).await {
        Ok(bytes) => DirMetadata::parse(path, &bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DirMetadata::default()),
        Err(e) => Err(SyncError::Io(e)),
    }
}

async fn copy_with_progress(
    src: &mut (dyn AsyncRead + Unpin + Send),
    dest: &mut (dyn AsyncWrite + Unpin + Send),
    progress: ProgressCallback<'_>,
) -> Result<u64> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n]).await?;
        total += n as u64;
        progress(n as u64);
    }
    dest.flush().await?;
    Ok(total)
}

fn filetime_from_secs(secs: f64) -> filetime::FileTime {
    filetime::FileTime::from_unix_time(secs.trunc() as i64, (secs.fract() * 1_000_000_000.0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_fails_on_missing_root_without_create_flag() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let mut target = LocalTarget::new(missing, TargetFlags::default(), false);
        assert!(target.open().await.is_err());
    }

    #[tokio::test]
    async fn open_creates_root_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("fresh");
        let mut target = LocalTarget::new(missing.clone(), TargetFlags::default(), true);
        target.open().await.unwrap();
        assert!(missing.is_dir());
    }

    #[tokio::test]
    async fn cwd_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = LocalTarget::new(dir.path().to_path_buf(), TargetFlags::default(), false);
        target.open().await.unwrap();
        let err = target.cwd("..").await.unwrap_err();
        assert!(matches!(err, SyncError::PathEscape { .. }));
    }

    #[tokio::test]
    async fn get_dir_omits_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hi").await.unwrap();
        tokio::fs::write(dir.path().join(META_FILE_NAME), b"{}").await.unwrap();
        let mut target = LocalTarget::new(dir.path().to_path_buf(), TargetFlags::default(), false);
        target.open().await.unwrap();
        let entries = target.get_dir().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
    }

    #[tokio::test]
    async fn dry_run_write_file_performs_no_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = LocalTarget::new(dir.path().to_path_buf(), TargetFlags { readonly: false, dry_run: true }, false);
        target.open().await.unwrap();
        let mut src = std::io::Cursor::new(b"abc".to_vec());
        let mut written = 0u64;
        target.write_file("a.txt", &mut src, Some(1000.0), &mut |n| written += n).await.unwrap();
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn write_file_readonly_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = LocalTarget::new(dir.path().to_path_buf(), TargetFlags { readonly: true, dry_run: false }, false);
        target.open().await.unwrap();
        let mut src = std::io::Cursor::new(b"abc".to_vec());
        let mut written = 0u64;
        let err = target.write_file("a.txt", &mut src, None, &mut |n| written += n).await.unwrap_err();
        assert!(matches!(err, SyncError::WriteDenied { .. }));
    }
}
