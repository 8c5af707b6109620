//! Spooled temporary buffering for backends that cannot seek on a live
//! connection.
//!
//! An FTP data channel or an SFTP remote file handle can typically be read
//! sequentially but not cheaply rewound; when the engine's copy strategy
//! needs random-access semantics from a source that can't provide them,
//! the bytes are buffered here first — in memory up to a threshold, then
//! spilled to a `tempfile::tempfile()`-backed file.

use std::io::{Read, Seek, SeekFrom, Write};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Default in-memory threshold before spilling to disk.
pub const DEFAULT_THRESHOLD: usize = 100 * 1024;

/// A buffer that stays in memory below `threshold` bytes and spills to an
/// anonymous temporary file beyond it.
pub enum Spooled {
    /// Entirely in memory.
    Memory(std::io::Cursor<Vec<u8>>),
    /// Spilled to disk.
    File(std::fs::File),
}

impl Spooled {
    /// Buffers all of `src` into a new `Spooled`, spilling to disk if the
    /// total exceeds `threshold` bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading `src` or creating the spill file
    /// fails.
    pub async fn buffer(src: &mut (dyn AsyncRead + Unpin + Send), threshold: usize) -> std::io::Result<Self> {
        let mut mem = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = src.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            mem.extend_from_slice(&chunk[..n]);
            if mem.len() > threshold {
                let mut file = tempfile::tempfile()?;
                file.write_all(&mem)?;
                loop {
                    let n = src.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    file.write_all(&chunk[..n])?;
                }
                file.seek(SeekFrom::Start(0))?;
                return Ok(Self::File(file));
            }
        }
        Ok(Self::Memory(std::io::Cursor::new(mem)))
    }

    /// Buffers all of `src` into a new `Spooled`, spilling to disk if the
    /// total exceeds `threshold` bytes. Blocking sibling of [`Spooled::buffer`]
    /// for use inside `spawn_blocking` closures driving a synchronous client
    /// (e.g. `suppaftp`'s streaming `retr` callback).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading `src` or creating the spill file
    /// fails.
    pub fn buffer_blocking(src: &mut dyn Read, threshold: usize) -> std::io::Result<Self> {
        let mut mem = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = src.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            mem.extend_from_slice(&chunk[..n]);
            if mem.len() > threshold {
                let mut file = tempfile::tempfile()?;
                file.write_all(&mem)?;
                loop {
                    let n = src.read(&mut chunk)?;
                    if n == 0 {
                        break;
                    }
                    file.write_all(&chunk[..n])?;
                }
                file.seek(SeekFrom::Start(0))?;
                return Ok(Self::File(file));
            }
        }
        Ok(Self::Memory(std::io::Cursor::new(mem)))
    }

    /// Total buffered length.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if querying the spilled file's metadata fails.
    pub fn len(&self) -> std::io::Result<u64> {
        match self {
            Self::Memory(c) => Ok(c.get_ref().len() as u64),
            Self::File(f) => Ok(f.metadata()?.len()),
        }
    }
}

impl Read for Spooled {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Memory(c) => c.read(buf),
            Self::File(f) => f.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stays_in_memory_below_threshold() {
        let mut src = std::io::Cursor::new(b"hello world".to_vec());
        let spooled = Spooled::buffer(&mut src, DEFAULT_THRESHOLD).await.unwrap();
        assert!(matches!(spooled, Spooled::Memory(_)));
        assert_eq!(spooled.len().unwrap(), 11);
    }

    #[tokio::test]
    async fn spills_to_disk_above_threshold() {
        let data = vec![7u8; 200];
        let mut src = std::io::Cursor::new(data.clone());
        let mut spooled = Spooled::buffer(&mut src, 100).await.unwrap();
        assert!(matches!(spooled, Spooled::File(_)));
        let mut read_back = Vec::new();
        spooled.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn blocking_variant_spills_to_disk_above_threshold() {
        let data = vec![9u8; 200];
        let mut src = std::io::Cursor::new(data.clone());
        let mut spooled = Spooled::buffer_blocking(&mut src, 100).unwrap();
        assert!(matches!(spooled, Spooled::File(_)));
        let mut read_back = Vec::new();
        spooled.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, data);
    }
}
