//! Directory reconciliation against an expected filename set.
//!
//! After a batch of downloads has committed, every immediate entry of the
//! target directory is classified as expected or unexpected. Unexpected
//! entries are either reported or, under a [`QuarantinePolicy`], renamed by
//! appending the quarantine extension. Nothing is ever deleted.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::download::TEMP_SUFFIX;
use crate::fs::FileSystem;

/// Extension appended to unexpected entries instead of merely reporting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinePolicy {
    extension: String,
}

impl QuarantinePolicy {
    /// Builds a policy from an optional extension; blank values and a
    /// leading `.` are normalised away, so `None`/`""`/`"  "` disable
    /// quarantine.
    #[must_use]
    pub fn from_extension(extension: Option<&str>) -> Option<Self> {
        let extension = extension?.trim().trim_start_matches('.');
        (!extension.is_empty()).then(|| Self {
            extension: extension.to_string(),
        })
    }

    /// The extension, without a leading dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether `name` already carries the extension.
    #[must_use]
    pub fn is_quarantined(&self, name: &OsStr) -> bool {
        name.as_encoded_bytes()
            .ends_with(self.extension.as_bytes())
    }

    /// `name` with `.extension` appended. Non-UTF-8 names keep their bytes.
    #[must_use]
    pub fn quarantined_name(&self, name: &OsStr) -> OsString {
        let mut renamed = name.to_os_string();
        renamed.push(".");
        renamed.push(&self.extension);
        renamed
    }
}

/// An entry that was renamed into quarantine.
///
/// Report names are for display; names that are not valid UTF-8 appear
/// lossily decoded here while the rename itself used the exact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedEntry {
    /// Name before the rename.
    pub original: String,
    /// Name after the rename.
    pub renamed: String,
}

/// A quarantine rename that failed. The pass continues past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameFailure {
    /// Full path of the entry.
    pub from: PathBuf,
    /// Intended new path.
    pub to: PathBuf,
    /// Error text.
    pub reason: String,
}

/// What a reconciliation pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries present in the expected set.
    pub expected: Vec<String>,
    /// Unexpected entries reported without mutation.
    pub unexpected: Vec<String>,
    /// Unexpected entries renamed into quarantine.
    pub quarantined: Vec<QuarantinedEntry>,
    /// Quarantine renames that failed.
    pub rename_failures: Vec<RenameFailure>,
    /// Fetcher scratch files (`<expected name>.tmp`), excluded from
    /// classification.
    pub temporary: Vec<String>,
    /// Expected names with no entry on disk.
    pub missing: Vec<String>,
}

impl ReconcileReport {
    /// Whether the directory matches the expected set exactly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unexpected.is_empty()
            && self.quarantined.is_empty()
            && self.rename_failures.is_empty()
            && self.missing.is_empty()
    }
}

/// Fatal reconciliation failures.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The directory could not be listed.
    #[error("could not list {directory}: {source}")]
    List {
        /// The directory being reconciled.
        directory: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Whether `name` is the fetcher's scratch path for one of the expected names.
fn is_scratch_for(name: &str, expected: &HashSet<String>) -> bool {
    name.strip_suffix(TEMP_SUFFIX)
        .is_some_and(|stem| expected.contains(stem))
}

/// Classifies directory entries and quarantines the unexpected ones.
#[derive(Debug, Clone)]
pub struct Reconciler {
    fs: Arc<dyn FileSystem>,
}

impl Reconciler {
    /// Creates a reconciler over `fs`.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Reconciles `directory` against `expected`.
    ///
    /// Runs must only start once every fetch into `directory` has committed.
    /// Re-running with no changes in between performs no further renames.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::List`] if the directory cannot be listed.
    /// Per-entry rename failures are recorded in the report instead.
    #[instrument(skip(self, expected), fields(directory = %directory.display(), expected = expected.len()))]
    pub async fn reconcile(
        &self,
        directory: &Path,
        expected: &HashSet<String>,
        quarantine: Option<&QuarantinePolicy>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let entries = self
            .fs
            .list_dir(directory)
            .await
            .map_err(|source| ReconcileError::List {
                directory: directory.to_path_buf(),
                source,
            })?;

        let mut report = ReconcileReport::default();
        let present: HashSet<&str> = entries.iter().filter_map(|name| name.to_str()).collect();

        for name in &entries {
            let display = name.to_string_lossy().into_owned();
            let utf8 = name.to_str();

            if utf8.is_some_and(|name| expected.contains(name)) {
                report.expected.push(display);
                continue;
            }

            if utf8.is_some_and(|name| is_scratch_for(name, expected)) {
                let entry = &display;
                debug!(entry = %entry, "skipping scratch file");
                report.temporary.push(display);
                continue;
            }

            let path = directory.join(name);
            match quarantine {
                Some(policy) if !policy.is_quarantined(name) => {
                    let renamed = policy.quarantined_name(name);
                    let target = directory.join(&renamed);
                    warn!(
                        path = %path.display(),
                        extension = policy.extension(),
                        "unexpected file, adding quarantine extension"
                    );
                    match self.fs.rename(&path, &target).await {
                        Ok(()) => report.quarantined.push(QuarantinedEntry {
                            original: display,
                            renamed: renamed.to_string_lossy().into_owned(),
                        }),
                        Err(error) => {
                            warn!(
                                from = %path.display(),
                                to = %target.display(),
                                error = %error,
                                "quarantine rename failed"
                            );
                            report.rename_failures.push(RenameFailure {
                                from: path,
                                to: target,
                                reason: error.to_string(),
                            });
                        }
                    }
                }
                _ => {
                    warn!(path = %path.display(), "unexpected file");
                    report.unexpected.push(display);
                }
            }
        }

        let mut missing: Vec<String> = expected
            .iter()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect();
        missing.sort();
        for name in &missing {
            debug!(entry = %name, "expected file missing");
        }
        report.missing = missing;

        info!(
            expected = report.expected.len(),
            unexpected = report.unexpected.len(),
            quarantined = report.quarantined.len(),
            rename_failures = report.rename_failures.len(),
            missing = report.missing.len(),
            "reconciliation complete"
        );
        Ok(report)
    }
}
