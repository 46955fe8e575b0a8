//! Batch description: which URL lands under which filename.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::download::is_safe_filename;

/// One resource of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Source URL.
    pub url: String,
    /// Name of the file inside the target directory.
    pub filename: String,
}

impl ManifestEntry {
    /// Creates an entry.
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }

    /// Whether the filename is a single safe path segment.
    #[must_use]
    pub fn has_safe_filename(&self) -> bool {
        is_safe_filename(&self.filename)
    }
}

/// Ordered list of entries for one directory.
///
/// Serialized as a bare JSON array of `{ "url", "filename" }` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Builds a manifest from entries.
    pub fn new(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Parses the JSON form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input. Unsafe filenames
    /// are not a parse error; they are rejected per entry at sync time.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Entries in manifest order.
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filenames the target directory is expected to hold after a sync.
    ///
    /// Unsafe filenames are left out: they are never written, so they can
    /// never be present.
    #[must_use]
    pub fn expected_filenames(&self) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|entry| entry.has_safe_filename())
            .map(|entry| entry.filename.clone())
            .collect()
    }
}
