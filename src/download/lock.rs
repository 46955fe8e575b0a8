//! Per-destination locking.
//!
//! Fetches and size checks against the same destination path must not
//! overlap. Distinct paths proceed in parallel. A path's entry lives only
//! while someone holds or awaits its lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by destination path.
///
/// Shared (via `Arc`) between a [`Fetcher`](super::Fetcher) and a
/// [`Verifier`](super::Verifier) so both serialize on the same keys.
#[derive(Debug, Default)]
pub struct PathLocks {
    /// Arc'd mutexes so the DashMap shard lock is released before awaiting.
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl PathLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `path`.
    pub async fn acquire(&self, path: &Path) -> PathGuard<'_> {
        let key = path.to_path_buf();
        let lock = Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        PathGuard {
            locks: self,
            path: key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of paths currently locked or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no path is locked or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one path; released on drop.
#[derive(Debug)]
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own Arc left: no holder and no waiter. Cloning in
        // `acquire` happens under the same shard lock, so this cannot race.
        self.locks
            .locks
            .remove_if(&self.path, |_, lock| Arc::strong_count(lock) == 1);
    }
}
