//! Filesystem capability used by the fetcher, hasher and reconciler.
//!
//! Everything that touches disk goes through [`FileSystem`], so the protocol
//! and the reconciliation pass can be exercised against [`MemoryFs`] as well
//! as the real [`LocalFs`].

mod memory;

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub use memory::MemoryFs;

/// Boxed writer returned by [`FileSystem::create`].
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Boxed reader returned by [`FileSystem::open`].
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Directory, rename and stream operations over some storage.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Creates `path` and any missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Names of the immediate children of `path`, sorted. Names are kept as
    /// the OS returned them, valid UTF-8 or not.
    async fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;

    /// Renames `from` to `to`, replacing any existing file at `to`.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Removes the file at `path`.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Byte length of the file at `path`, or `None` when nothing is there.
    async fn file_len(&self, path: &Path) -> io::Result<Option<u64>>;

    /// Creates (or truncates) the file at `path` for writing.
    async fn create(&self, path: &Path) -> io::Result<FileWriter>;

    /// Opens the file at `path` for reading.
    async fn open(&self, path: &Path) -> io::Result<FileReader>;
}

/// The host filesystem via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl FileSystem for LocalFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name());
        }
        names.sort();
        Ok(names)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn file_len(&self, path: &Path) -> io::Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, path: &Path) -> io::Result<FileWriter> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(file))
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}
