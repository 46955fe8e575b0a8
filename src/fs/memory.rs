//! In-memory filesystem for exercising the protocol without touching disk.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{FileReader, FileSystem, FileWriter};

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    failing_renames: HashSet<PathBuf>,
}

/// Shared in-memory tree of files and directories.
///
/// Clones share state. Writes land in the map as they happen, so a reader
/// stat-ing a path mid-write observes the partial length, the same as a
/// real disk. Every mutating call bumps [`MemoryFs::mutations`].
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    state: Arc<Mutex<State>>,
    mutations: Arc<AtomicUsize>,
}

impl MemoryFs {
    /// Creates an empty filesystem with `/` present.
    #[must_use]
    pub fn new() -> Self {
        let fs = Self::default();
        fs.lock().dirs.insert(PathBuf::from("/"));
        fs
    }

    /// Inserts a file, creating its parent directories.
    pub fn insert_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            insert_dir_chain(&mut state, parent);
        }
        state.files.insert(path.to_path_buf(), contents.into());
    }

    /// Inserts a directory and its parents.
    pub fn insert_dir(&self, path: impl AsRef<Path>) {
        insert_dir_chain(&mut self.lock(), path.as_ref());
    }

    /// Contents of the file at `path`.
    #[must_use]
    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    /// Whether a file or directory exists at `path`.
    #[must_use]
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let state = self.lock();
        let path = path.as_ref();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    /// Makes every future rename away from `path` fail with `PermissionDenied`.
    pub fn fail_renames_from(&self, path: impl AsRef<Path>) {
        self.lock().failing_renames.insert(path.as_ref().to_path_buf());
    }

    /// Number of mutating operations performed so far.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

fn insert_dir_chain(state: &mut State, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        state.dirs.insert(ancestor.to_path_buf());
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

fn parent_exists(state: &State, path: &Path) -> bool {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => state.dirs.contains(parent),
        _ => true,
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if state.files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a file", path.display()),
            ));
        }
        insert_dir_chain(&mut state, path);
        drop(state);
        self.bump();
        Ok(())
    }

    async fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let state = self.lock();
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        let children = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter(|candidate| candidate.parent() == Some(path))
            .filter_map(|candidate| candidate.file_name())
            .map(ToOwned::to_owned)
            .collect::<BTreeSet<OsString>>();
        Ok(children.into_iter().collect())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if state.failing_renames.contains(from) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("rename of {} denied", from.display()),
            ));
        }
        if !parent_exists(&state, to) {
            return Err(not_found(to));
        }
        let contents = state.files.remove(from).ok_or_else(|| not_found(from))?;
        state.files.insert(to.to_path_buf(), contents);
        drop(state);
        self.bump();
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.lock()
            .files
            .remove(path)
            .ok_or_else(|| not_found(path))?;
        self.bump();
        Ok(())
    }

    async fn file_len(&self, path: &Path) -> io::Result<Option<u64>> {
        Ok(self
            .lock()
            .files
            .get(path)
            .map(|contents| contents.len() as u64))
    }

    async fn create(&self, path: &Path) -> io::Result<FileWriter> {
        let mut state = self.lock();
        if !parent_exists(&state, path) {
            return Err(not_found(path));
        }
        state.files.insert(path.to_path_buf(), Vec::new());
        drop(state);
        self.bump();
        Ok(Box::new(MemoryWriter {
            fs: self.clone(),
            path: path.to_path_buf(),
        }))
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        let contents = self.read(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(io::Cursor::new(contents)))
    }
}

/// Appends straight into the shared map.
struct MemoryWriter {
    fs: MemoryFs,
    path: PathBuf,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.fs.lock();
        match state.files.get_mut(&self.path) {
            Some(contents) => {
                contents.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            None => Poll::Ready(Err(not_found(&self.path))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_list_dir_returns_immediate_children_only() {
        let fs = MemoryFs::new();
        fs.insert_file("/set/a.jpg", "a");
        fs.insert_file("/set/sub/b.jpg", "b");

        let names = fs.list_dir(Path::new("/set")).await.unwrap();
        assert_eq!(names, vec!["a.jpg", "sub"]);
    }

    #[tokio::test]
    async fn test_create_requires_parent_directory() {
        let fs = MemoryFs::new();
        let result = fs.create(Path::new("/missing/file")).await;
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_writes_are_visible_before_shutdown() {
        let fs = MemoryFs::new();
        let mut writer = fs.create(Path::new("/partial")).await.unwrap();
        writer.write_all(b"abc").await.unwrap();

        assert_eq!(fs.file_len(Path::new("/partial")).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_rename_replaces_target_and_counts_mutation() {
        let fs = MemoryFs::new();
        fs.insert_file("/d/new", "new");
        fs.insert_file("/d/old", "old contents");
        let before = fs.mutations();

        fs.rename(Path::new("/d/new"), Path::new("/d/old"))
            .await
            .unwrap();

        assert_eq!(fs.read("/d/old").unwrap(), b"new");
        assert!(!fs.exists("/d/new"));
        assert_eq!(fs.mutations(), before + 1);
    }

    #[tokio::test]
    async fn test_injected_rename_failure() {
        let fs = MemoryFs::new();
        fs.insert_file("/d/locked", "x");
        fs.fail_renames_from("/d/locked");

        let err = fs
            .rename(Path::new("/d/locked"), Path::new("/d/locked.bak"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(fs.exists("/d/locked"));
    }
}
