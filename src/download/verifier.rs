//! Size-parity check between a local file and its remote copy.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::error::TransferError;
use super::fetcher::parse_http_url;
use super::lock::PathLocks;
use crate::fs::FileSystem;
use crate::transport::Transport;

/// Local vs remote byte length.
///
/// `equal` is true only when both sizes are known and identical; a missing
/// local file or a missing `Content-Length` never compares equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeComparison {
    /// Length of the local file, `None` when it does not exist.
    pub local_size: Option<u64>,
    /// `Content-Length` reported by HEAD, `None` when absent.
    pub remote_size: Option<u64>,
    /// Whether the two sizes match.
    pub equal: bool,
}

impl SizeComparison {
    /// Compares the two sizes.
    #[must_use]
    pub fn new(local_size: Option<u64>, remote_size: Option<u64>) -> Self {
        let equal = matches!((local_size, remote_size), (Some(local), Some(remote)) if local == remote);
        Self {
            local_size,
            remote_size,
            equal,
        }
    }
}

/// Decides whether a destination is already up to date without downloading.
#[derive(Debug, Clone)]
pub struct Verifier {
    transport: Arc<dyn Transport>,
    fs: Arc<dyn FileSystem>,
    locks: Arc<PathLocks>,
}

impl Verifier {
    /// Creates a verifier serializing on `locks`; pass the fetcher's table
    /// via [`Fetcher::locks`](super::Fetcher::locks).
    pub fn new(
        transport: Arc<dyn Transport>,
        fs: Arc<dyn FileSystem>,
        locks: Arc<PathLocks>,
    ) -> Self {
        Self {
            transport,
            fs,
            locks,
        }
    }

    /// HEADs `url` and compares its `Content-Length` with `destination`.
    ///
    /// # Errors
    ///
    /// Transport failures and non-2xx HEAD responses are returned as
    /// [`TransferError`]; callers decide whether that blocks the download or
    /// only skips the check. An unreadable (but existing) local path is an
    /// [`TransferError::Io`].
    #[instrument(skip(self), fields(url = %url, path = %destination.display()))]
    pub async fn compare(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<SizeComparison, TransferError> {
        let parsed = parse_http_url(url)?;
        let _guard = self.locks.acquire(destination).await;

        let local_size = self
            .fs
            .file_len(destination)
            .await
            .map_err(|e| TransferError::io(destination, e))?;

        let response = self
            .transport
            .head(&parsed)
            .await
            .map_err(|e| TransferError::from_transport(url, destination, e))?;

        if !response.is_success() {
            warn!(status = response.status, "unexpected HTTP status on size check");
            return Err(TransferError::http_status(url, destination, response.status));
        }

        let comparison = SizeComparison::new(local_size, response.content_length());
        if comparison.equal {
            debug!(size = ?comparison.local_size, "local and remote sizes match");
        } else {
            debug!(
                local = ?comparison.local_size,
                remote = ?comparison.remote_size,
                "local and remote sizes differ"
            );
        }
        Ok(comparison)
    }

    /// Whether `destination` has exactly the size the server reports for `url`.
    ///
    /// # Errors
    ///
    /// Same as [`compare`](Self::compare).
    pub async fn sizes_match(&self, url: &str, destination: &Path) -> Result<bool, TransferError> {
        Ok(self.compare(url, destination).await?.equal)
    }
}
