//! Batch synchronization of one directory against a [`Manifest`].
//!
//! Each entry is optionally size-checked, fetched when needed and optionally
//! digested. Entries run concurrently up to a semaphore limit. Once every
//! entry has finished, the directory is reconciled exactly once against the
//! manifest's filenames.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use mirror_core::download::HostFallbacks;
//! use mirror_core::fs::LocalFs;
//! use mirror_core::manifest::{Manifest, ManifestEntry};
//! use mirror_core::sync::{SyncEngine, SyncOptions};
//! use mirror_core::transport::HttpTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::new(
//!     Arc::new(HttpTransport::new()?),
//!     Arc::new(LocalFs),
//!     HostFallbacks::none(),
//!     SyncOptions::default(),
//! )?;
//! let manifest = Manifest::new([ManifestEntry::new("http://example.com/1.jpg", "1.jpg")]);
//! let report = engine.sync_directory(Path::new("./archive/set"), &manifest).await?;
//! println!("downloaded {}, failed {}", report.downloaded(), report.failed());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::digest::{DigestOutcome, Hasher};
use crate::download::{Fetcher, HostFallbacks, TransferErrorKind, Verifier};
use crate::fs::FileSystem;
use crate::manifest::{Manifest, ManifestEntry};
use crate::reconcile::{QuarantinePolicy, ReconcileError, ReconcileReport, Reconciler};
use crate::transport::Transport;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 32;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Error type for sync engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The target directory could not be created.
    #[error("could not create {directory}: {source}")]
    CreateDirectory {
        /// The target directory.
        directory: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Reconciliation after the batch failed.
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Knobs for a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Skip entries whose local size already matches the remote size.
    pub verify_sizes: bool,
    /// Digest each file present after its entry finishes.
    pub compute_digests: bool,
    /// Rename unexpected entries instead of only reporting them.
    pub quarantine: Option<QuarantinePolicy>,
    /// Maximum number of entries in flight.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            verify_sizes: true,
            compute_digests: false,
            quarantine: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// What happened to one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// The body was fetched and committed.
    Downloaded {
        /// Body bytes written.
        bytes: u64,
        /// URL that finally served the body.
        final_url: String,
        /// Digest of the committed file, when requested.
        digest: Option<DigestOutcome>,
    },
    /// The local file already had the remote size.
    UpToDate {
        /// Digest of the existing file, when requested.
        digest: Option<DigestOutcome>,
    },
    /// The transfer failed; nothing was committed.
    Failed {
        /// Failure category.
        kind: TransferErrorKind,
        /// Error text.
        error: String,
    },
    /// The entry was not attempted.
    Rejected {
        /// Why the entry was refused.
        reason: String,
    },
}

/// An entry together with its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    /// The manifest entry as given.
    pub entry: ManifestEntry,
    /// Path the entry maps to; `None` for rejected filenames.
    pub destination: Option<PathBuf>,
    /// What happened to the entry.
    pub status: EntryStatus,
}

/// Per-entry results in manifest order plus the reconciliation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// One outcome per manifest entry, in manifest order.
    pub outcomes: Vec<EntryOutcome>,
    /// The single reconciliation pass run after every entry finished.
    pub reconcile: ReconcileReport,
}

impl SyncReport {
    fn count(&self, predicate: impl Fn(&EntryStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }

    /// Entries fetched during this run.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.count(|status| matches!(status, EntryStatus::Downloaded { .. }))
    }

    /// Entries skipped because the local size already matched.
    #[must_use]
    pub fn up_to_date(&self) -> usize {
        self.count(|status| matches!(status, EntryStatus::UpToDate { .. }))
    }

    /// Entries whose transfer failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, EntryStatus::Failed { .. }))
    }

    /// Entries refused for an unsafe or duplicate filename.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.count(|status| matches!(status, EntryStatus::Rejected { .. }))
    }

    /// Whether every entry is present and nothing was refused.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.rejected() == 0
    }
}

/// Coordinates verify, fetch and digest per entry, then reconciles.
///
/// # Concurrency Model
///
/// - Each entry runs in its own Tokio task
/// - A semaphore permit is acquired before spawning each task
/// - The fetcher and verifier share one destination lock table
/// - Reconciliation starts only after every task has been joined
#[derive(Debug)]
pub struct SyncEngine {
    fs: Arc<dyn FileSystem>,
    fetcher: Fetcher,
    verifier: Verifier,
    hasher: Hasher,
    reconciler: Reconciler,
    semaphore: Arc<Semaphore>,
    options: SyncOptions,
}

impl SyncEngine {
    /// Creates an engine over `transport` and `fs`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `options.concurrency`
    /// is outside 1..=32.
    #[instrument(level = "debug", skip(transport, fs, fallbacks))]
    pub fn new(
        transport: Arc<dyn Transport>,
        fs: Arc<dyn FileSystem>,
        fallbacks: HostFallbacks,
        options: SyncOptions,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&options.concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: options.concurrency,
            });
        }

        debug!(
            concurrency = options.concurrency,
            fallback_rules = fallbacks.len(),
            "creating sync engine"
        );

        let fetcher = Fetcher::new(Arc::clone(&transport), Arc::clone(&fs), fallbacks);
        let verifier = Verifier::new(transport, Arc::clone(&fs), fetcher.locks());
        Ok(Self {
            hasher: Hasher::new(Arc::clone(&fs)),
            reconciler: Reconciler::new(Arc::clone(&fs)),
            semaphore: Arc::new(Semaphore::new(options.concurrency)),
            fs,
            fetcher,
            verifier,
            options,
        })
    }

    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Brings `directory` in line with `manifest`.
    ///
    /// Individual entry failures do NOT cause this method to error; they are
    /// reported per entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CreateDirectory`] if the directory cannot be
    /// created, [`EngineError::Reconcile`] if it cannot be listed afterwards.
    #[instrument(skip(self, manifest), fields(directory = %directory.display(), entries = manifest.len()))]
    pub async fn sync_directory(
        &self,
        directory: &Path,
        manifest: &Manifest,
    ) -> Result<SyncReport, EngineError> {
        self.fs
            .create_dir_all(directory)
            .await
            .map_err(|source| EngineError::CreateDirectory {
                directory: directory.to_path_buf(),
                source,
            })?;

        info!("starting sync");

        let mut seen: HashSet<&str> = HashSet::new();
        let mut pending = Vec::with_capacity(manifest.len());

        for entry in manifest.entries() {
            if let Some(reason) = rejection_reason(entry, &mut seen) {
                warn!(url = %entry.url, filename = %entry.filename, reason, "entry rejected");
                pending.push(Pending::Rejected(entry.clone(), reason.to_string()));
                continue;
            }

            let destination = directory.join(&entry.filename);
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let task = EntryTask {
                fetcher: self.fetcher.clone(),
                verifier: self.verifier.clone(),
                hasher: self.hasher.clone(),
                verify_sizes: self.options.verify_sizes,
                compute_digests: self.options.compute_digests,
            };
            let url = entry.url.clone();
            let task_destination = destination.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                task.run(&url, &task_destination).await
            });
            pending.push(Pending::Spawned(entry.clone(), destination, handle));
        }

        debug!(task_count = pending.len(), "waiting for entries to complete");

        let mut outcomes = Vec::with_capacity(pending.len());
        for item in pending {
            outcomes.push(match item {
                Pending::Rejected(entry, reason) => EntryOutcome {
                    entry,
                    destination: None,
                    status: EntryStatus::Rejected { reason },
                },
                Pending::Spawned(entry, destination, handle) => {
                    let status = handle.await.unwrap_or_else(|e| {
                        warn!(error = %e, url = %entry.url, "entry task panicked");
                        EntryStatus::Failed {
                            kind: TransferErrorKind::Io,
                            error: format!("task failed: {e}"),
                        }
                    });
                    EntryOutcome {
                        entry,
                        destination: Some(destination),
                        status,
                    }
                }
            });
        }

        let reconcile = self
            .reconciler
            .reconcile(
                directory,
                &manifest.expected_filenames(),
                self.options.quarantine.as_ref(),
            )
            .await?;

        let report = SyncReport { outcomes, reconcile };
        info!(
            downloaded = report.downloaded(),
            up_to_date = report.up_to_date(),
            failed = report.failed(),
            rejected = report.rejected(),
            "sync complete"
        );
        Ok(report)
    }
}

enum Pending {
    Rejected(ManifestEntry, String),
    Spawned(ManifestEntry, PathBuf, tokio::task::JoinHandle<EntryStatus>),
}

fn rejection_reason<'a>(entry: &'a ManifestEntry, seen: &mut HashSet<&'a str>) -> Option<&'static str> {
    if !entry.has_safe_filename() {
        return Some("filename is not a single safe path segment");
    }
    if !seen.insert(entry.filename.as_str()) {
        return Some("filename already used by an earlier entry");
    }
    None
}

/// Everything one spawned entry needs, owned.
struct EntryTask {
    fetcher: Fetcher,
    verifier: Verifier,
    hasher: Hasher,
    verify_sizes: bool,
    compute_digests: bool,
}

impl EntryTask {
    async fn run(&self, url: &str, destination: &Path) -> EntryStatus {
        if self.verify_sizes {
            match self.verifier.sizes_match(url, destination).await {
                Ok(true) => {
                    debug!(url, path = %destination.display(), "already up to date");
                    return EntryStatus::UpToDate {
                        digest: self.digest(destination).await,
                    };
                }
                Ok(false) => {}
                // Size check is advisory; the fetch reports the real failure.
                Err(error) => {
                    warn!(url, error = %error, "size check failed, downloading anyway");
                }
            }
        }

        match self.fetcher.download(url, destination).await {
            Ok(outcome) => EntryStatus::Downloaded {
                bytes: outcome.bytes_written,
                final_url: outcome.final_url.to_string(),
                digest: self.digest(&outcome.path).await,
            },
            Err(error) => {
                warn!(url, error = %error, "download failed");
                EntryStatus::Failed {
                    kind: error.kind(),
                    error: error.to_string(),
                }
            }
        }
    }

    async fn digest(&self, path: &Path) -> Option<DigestOutcome> {
        if !self.compute_digests {
            return None;
        }
        Some(self.hasher.digest_or_unavailable(path).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::download::HostFallbackRule;
    use crate::fs::MemoryFs;
    use crate::test_support::scripted_transport::{ScriptedResponse, ScriptedTransport};

    fn engine(transport: &ScriptedTransport, fs: &MemoryFs, options: SyncOptions) -> SyncEngine {
        SyncEngine::new(
            Arc::new(transport.clone()),
            Arc::new(fs.clone()),
            HostFallbacks::none(),
            options,
        )
        .unwrap()
    }

    fn head_with_length(length: usize) -> ScriptedResponse {
        ScriptedResponse::status(200).with_header("content-length", &length.to_string())
    }

    fn manifest(entries: &[(&str, &str)]) -> Manifest {
        Manifest::new(
            entries
                .iter()
                .map(|(url, filename)| ManifestEntry::new(*url, *filename)),
        )
    }

    #[test]
    fn test_invalid_concurrency_rejected() {
        for value in [0, MAX_CONCURRENCY + 1] {
            let result = SyncEngine::new(
                Arc::new(ScriptedTransport::new()),
                Arc::new(MemoryFs::new()),
                HostFallbacks::none(),
                SyncOptions {
                    concurrency: value,
                    ..SyncOptions::default()
                },
            );
            assert!(matches!(
                result,
                Err(EngineError::InvalidConcurrency { value: v }) if v == value
            ));
        }
    }

    #[tokio::test]
    async fn test_up_to_date_entries_are_skipped() {
        let transport = ScriptedTransport::new()
            .on_head("http://example.com/a.jpg", head_with_length(5))
            .on_head("http://example.com/b.jpg", head_with_length(3))
            .on_get("http://example.com/b.jpg", ScriptedResponse::ok("bbb"));
        let fs = MemoryFs::new();
        fs.insert_file("/set/a.jpg", "aaaaa");

        let report = engine(&transport, &fs, SyncOptions::default())
            .sync_directory(
                Path::new("/set"),
                &manifest(&[
                    ("http://example.com/a.jpg", "a.jpg"),
                    ("http://example.com/b.jpg", "b.jpg"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(report.up_to_date(), 1);
        assert_eq!(report.downloaded(), 1);
        assert!(!transport.calls().contains(&"GET http://example.com/a.jpg".to_string()));
        assert_eq!(fs.read("/set/b.jpg").unwrap(), b"bbb");
        assert!(report.reconcile.is_clean());
    }

    #[tokio::test]
    async fn test_no_verify_always_downloads() {
        let transport = ScriptedTransport::new()
            .on_get("http://example.com/a.jpg", ScriptedResponse::ok("fresh"));
        let fs = MemoryFs::new();
        fs.insert_file("/set/a.jpg", "stale");
        let options = SyncOptions {
            verify_sizes: false,
            ..SyncOptions::default()
        };

        let report = engine(&transport, &fs, options)
            .sync_directory(Path::new("/set"), &manifest(&[("http://example.com/a.jpg", "a.jpg")]))
            .await
            .unwrap();

        assert_eq!(report.downloaded(), 1);
        assert_eq!(transport.calls(), vec!["GET http://example.com/a.jpg"]);
        assert_eq!(fs.read("/set/a.jpg").unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_failures_are_per_entry() {
        let transport = ScriptedTransport::new()
            .on_get("http://example.com/a.jpg", ScriptedResponse::ok("a"))
            .on_get("http://example.com/gone.jpg", ScriptedResponse::status(404));
        let fs = MemoryFs::new();

        let report = engine(&transport, &fs, SyncOptions::default())
            .sync_directory(
                Path::new("/set"),
                &manifest(&[
                    ("http://example.com/gone.jpg", "gone.jpg"),
                    ("http://example.com/a.jpg", "a.jpg"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.downloaded(), 1);
        assert!(matches!(
            report.outcomes[0].status,
            EntryStatus::Failed {
                kind: TransferErrorKind::HttpStatus(404),
                ..
            }
        ));
        assert!(!fs.exists("/set/gone.jpg"));
        assert!(!fs.exists("/set/gone.jpg.tmp"));
        assert_eq!(report.reconcile.missing, vec!["gone.jpg"]);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_unsafe_and_duplicate_filenames_are_rejected() {
        let transport = ScriptedTransport::new()
            .on_get("http://example.com/a.jpg", ScriptedResponse::ok("a"));
        let fs = MemoryFs::new();

        let report = engine(&transport, &fs, SyncOptions::default())
            .sync_directory(
                Path::new("/set"),
                &manifest(&[
                    ("http://example.com/a.jpg", "a.jpg"),
                    ("http://example.com/escape", "../escape.jpg"),
                    ("http://example.com/again", "a.jpg"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(report.rejected(), 2);
        assert_eq!(report.outcomes[1].destination, None);
        assert!(transport.calls().iter().all(|call| call.ends_with("/a.jpg")));
        assert!(!fs.exists("/escape.jpg"));
    }

    #[tokio::test]
    async fn test_reconcile_quarantines_after_batch() {
        let chunks = vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()];
        let transport = ScriptedTransport::new().on_get(
            "http://example.com/a.jpg",
            ScriptedResponse::ok(Vec::new()).chunked(chunks, Duration::from_millis(5)),
        );
        let fs = MemoryFs::new();
        fs.insert_file("/set/stray.txt", "s");
        let options = SyncOptions {
            quarantine: QuarantinePolicy::from_extension(Some("unexpected")),
            ..SyncOptions::default()
        };

        let report = engine(&transport, &fs, options)
            .sync_directory(Path::new("/set"), &manifest(&[("http://example.com/a.jpg", "a.jpg")]))
            .await
            .unwrap();

        assert!(report.reconcile.temporary.is_empty());
        assert_eq!(report.reconcile.expected, vec!["a.jpg"]);
        assert_eq!(report.reconcile.quarantined.len(), 1);
        assert_eq!(
            fs.list_dir(Path::new("/set")).await.unwrap(),
            vec!["a.jpg", "stray.txt.unexpected"]
        );
        assert_eq!(fs.read("/set/a.jpg").unwrap(), b"aabbcc");
    }

    #[tokio::test]
    async fn test_digests_reported_when_enabled() {
        let transport = ScriptedTransport::new()
            .on_get("http://example.com/a.jpg", ScriptedResponse::ok("abc"));
        let fs = MemoryFs::new();
        let options = SyncOptions {
            compute_digests: true,
            ..SyncOptions::default()
        };

        let report = engine(&transport, &fs, options)
            .sync_directory(Path::new("/set"), &manifest(&[("http://example.com/a.jpg", "a.jpg")]))
            .await
            .unwrap();

        let EntryStatus::Downloaded { digest, bytes, .. } = &report.outcomes[0].status else {
            panic!("expected download, got {:?}", report.outcomes[0].status);
        };
        assert_eq!(*bytes, 3);
        assert_eq!(
            digest.as_ref().and_then(DigestOutcome::digest).unwrap().as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_fallback_url_is_reported() {
        let transport = ScriptedTransport::new()
            .unreachable("farm0.static.example.com")
            .on_get("http://farm1.static.example.com/1.jpg", ScriptedResponse::ok("1"));
        let fs = MemoryFs::new();
        let engine = SyncEngine::new(
            Arc::new(transport.clone()),
            Arc::new(fs.clone()),
            HostFallbacks::new([HostFallbackRule::new(
                "farm0.static.example.com",
                "farm1.static.example.com",
            )]),
            SyncOptions {
                verify_sizes: false,
                ..SyncOptions::default()
            },
        )
        .unwrap();

        let report = engine
            .sync_directory(
                Path::new("/set"),
                &manifest(&[("http://farm0.static.example.com/1.jpg", "1.jpg")]),
            )
            .await
            .unwrap();

        assert_eq!(
            report.outcomes[0].status,
            EntryStatus::Downloaded {
                bytes: 1,
                final_url: "http://farm1.static.example.com/1.jpg".to_string(),
                digest: None,
            }
        );
    }

    #[tokio::test]
    async fn test_single_slot_engine_finishes_every_entry() {
        let mut transport = ScriptedTransport::new();
        let mut entries = Vec::new();
        for i in 0..6 {
            let url = format!("http://example.com/{i}.jpg");
            transport = transport.on_get(&url, ScriptedResponse::ok(vec![b'x'; i + 1]));
            entries.push(ManifestEntry::new(url, format!("{i}.jpg")));
        }
        let fs = MemoryFs::new();
        let options = SyncOptions {
            concurrency: 1,
            verify_sizes: false,
            ..SyncOptions::default()
        };

        let report = engine(&transport, &fs, options)
            .sync_directory(Path::new("/set"), &Manifest::new(entries))
            .await
            .unwrap();

        assert_eq!(report.downloaded(), 6);
        assert_eq!(fs.read("/set/5.jpg").unwrap().len(), 6);
        assert!(report.is_success());
    }
}
