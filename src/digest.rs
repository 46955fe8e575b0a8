//! Content digests of local files.
//!
//! Digests identify file contents for integrity reporting; they are not a
//! security boundary. Files are streamed through SHA-256 in fixed-size
//! chunks, so memory use does not grow with file size.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, warn};

use crate::download::constants::DIGEST_BUFFER_SIZE;
use crate::fs::FileSystem;

/// Lowercase, full-width hex digest of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Hex string of the digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reading a file for digesting failed.
#[derive(Debug, Error)]
#[error("could not digest {path}: {source}")]
pub struct DigestError {
    /// The file being digested.
    pub path: PathBuf,
    /// The underlying IO error.
    #[source]
    pub source: std::io::Error,
}

/// Best-effort digest result for reporting paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    /// The digest was computed.
    Computed(ContentDigest),
    /// The file could not be read; `reason` is the error text.
    Unavailable {
        /// Why no digest is available.
        reason: String,
    },
}

impl DigestOutcome {
    /// The digest, when computed.
    #[must_use]
    pub fn digest(&self) -> Option<&ContentDigest> {
        match self {
            Self::Computed(digest) => Some(digest),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Computes [`ContentDigest`]s through a [`FileSystem`].
#[derive(Debug, Clone)]
pub struct Hasher {
    fs: Arc<dyn FileSystem>,
}

impl Hasher {
    /// Creates a hasher reading through `fs`.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Digest of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if the file cannot be opened or read.
    #[instrument(level = "debug", skip(self), fields(path = %path.display()))]
    pub async fn digest(&self, path: &Path) -> Result<ContentDigest, DigestError> {
        let to_error = |source| DigestError {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = self.fs.open(path).await.map_err(to_error)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; DIGEST_BUFFER_SIZE];
        let mut total: u64 = 0;

        loop {
            let read = reader.read(&mut buffer).await.map_err(to_error)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        let digest = ContentDigest(hex::encode(hasher.finalize()));
        debug!(bytes = total, digest = %digest, "digest computed");
        Ok(digest)
    }

    /// Like [`digest`](Self::digest), but logs failures and reports them as
    /// [`DigestOutcome::Unavailable`] instead of returning an error.
    pub async fn digest_or_unavailable(&self, path: &Path) -> DigestOutcome {
        match self.digest(path).await {
            Ok(digest) => DigestOutcome::Computed(digest),
            Err(error) => {
                warn!(error = %error, "digest unavailable");
                DigestOutcome::Unavailable {
                    reason: error.to_string(),
                }
            }
        }
    }
}
