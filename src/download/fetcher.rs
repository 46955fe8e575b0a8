//! Atomic single-resource download.
//!
//! A fetch streams the response body into `<destination>.tmp` in the same
//! directory and commits it with a rename over the destination. Readers of the
//! destination see either the previous file, nothing, or the complete new
//! file, never a partial write.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::TEMP_SUFFIX;
use super::error::TransferError;
use super::fallback::HostFallbacks;
use super::lock::PathLocks;
use crate::fs::FileSystem;
use crate::transport::{BodyStream, Transport, TransportError, TransportResponse};

/// Scratch path for `destination`: the same path with [`TEMP_SUFFIX`] appended.
#[must_use]
pub fn temporary_path(destination: &Path) -> PathBuf {
    let mut raw = destination.as_os_str().to_owned();
    raw.push(TEMP_SUFFIX);
    PathBuf::from(raw)
}

/// One resource transfer in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// URL as supplied by the caller.
    pub source_url: Url,
    /// Final path of the file.
    pub destination: PathBuf,
    /// Scratch path the body is written to before commit.
    pub temporary: PathBuf,
}

impl DownloadJob {
    /// Creates a job, deriving the scratch path from `destination`.
    pub fn new(source_url: Url, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        let temporary = temporary_path(&destination);
        Self {
            source_url,
            destination,
            temporary,
        }
    }
}

/// Result of a committed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Committed destination path.
    pub path: PathBuf,
    /// Body bytes written.
    pub bytes_written: u64,
    /// URL that finally served the body, after any host rewrites.
    pub final_url: Url,
}

/// Downloads resources atomically with host fallback.
///
/// Cheap to clone; clones share the transport, filesystem, fallback rules
/// and destination lock table.
#[derive(Debug, Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    fs: Arc<dyn FileSystem>,
    fallbacks: Arc<HostFallbacks>,
    locks: Arc<PathLocks>,
}

impl Fetcher {
    /// Creates a fetcher with its own lock table.
    pub fn new(
        transport: Arc<dyn Transport>,
        fs: Arc<dyn FileSystem>,
        fallbacks: HostFallbacks,
    ) -> Self {
        Self {
            transport,
            fs,
            fallbacks: Arc::new(fallbacks),
            locks: Arc::new(PathLocks::new()),
        }
    }

    /// Uses `locks` instead of a private lock table, so a
    /// [`Verifier`](super::Verifier) can share it.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<PathLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// The lock table this fetcher serializes on.
    #[must_use]
    pub fn locks(&self) -> Arc<PathLocks> {
        Arc::clone(&self.locks)
    }

    /// Downloads `url` to `destination`.
    ///
    /// Creates the parent directory if needed. Unreachable hosts matching a
    /// fallback rule are retried against the successor host; nothing else is
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] if:
    /// - the URL is invalid or not http(s)
    /// - the host is unreachable and no fallback applies
    /// - the server answers with a non-2xx status
    /// - the request times out or the body stream breaks
    /// - creating the directory, writing or committing the file fails
    #[instrument(skip(self), fields(url = %url, path = %destination.display()))]
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<FetchOutcome, TransferError> {
        let source_url = parse_http_url(url)?;
        let job = DownloadJob::new(source_url, destination);
        let _guard = self.locks.acquire(&job.destination).await;
        self.run(&job).await
    }

    async fn run(&self, job: &DownloadJob) -> Result<FetchOutcome, TransferError> {
        if let Some(parent) = job
            .destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        let (response, final_url) = self.send_with_fallback(job).await?;
        let TransportResponse { status, body, .. } = response;

        if !(200..300).contains(&status) {
            warn!(status, url = %final_url, "unexpected HTTP status");
            return Err(TransferError::http_status(
                final_url.as_str(),
                &job.destination,
                status,
            ));
        }

        let bytes_written = match self.write_temporary(job, &final_url, body).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.discard_temporary(job).await;
                return Err(error);
            }
        };

        if let Err(error) = self.fs.rename(&job.temporary, &job.destination).await {
            self.discard_temporary(job).await;
            return Err(TransferError::io(&job.destination, error));
        }

        info!(
            path = %job.destination.display(),
            bytes = bytes_written,
            url = %final_url,
            "download committed"
        );

        Ok(FetchOutcome {
            path: job.destination.clone(),
            bytes_written,
            final_url,
        })
    }

    /// Sends the GET, rewriting the host on unreachable aliases.
    ///
    /// Each successor host is tried at most once and the number of rewrites
    /// never exceeds the number of rules, so a cyclic rule set terminates.
    async fn send_with_fallback(
        &self,
        job: &DownloadJob,
    ) -> Result<(TransportResponse, Url), TransferError> {
        let mut url = job.source_url.clone();
        let mut unreachable_hosts: Vec<String> = Vec::new();

        loop {
            debug!(url = %url, temporary = %job.temporary.display(), "requesting");
            match self.transport.get(&url).await {
                Ok(response) => return Ok((response, url)),
                Err(TransportError::HostUnreachable { host, message }) => {
                    unreachable_hosts.push(host.clone());
                    let Some(next) = self.next_fallback(&url, &unreachable_hosts) else {
                        return Err(TransferError::from_transport(
                            url.as_str(),
                            &job.destination,
                            TransportError::HostUnreachable { host, message },
                        ));
                    };
                    warn!(
                        unreachable = %host,
                        successor = next.host_str().unwrap_or_default(),
                        "host unreachable, retrying against successor"
                    );
                    url = next;
                }
                Err(error) => {
                    return Err(TransferError::from_transport(
                        url.as_str(),
                        &job.destination,
                        error,
                    ));
                }
            }
        }
    }

    fn next_fallback(&self, url: &Url, unreachable_hosts: &[String]) -> Option<Url> {
        if unreachable_hosts.len() > self.fallbacks.len() {
            return None;
        }
        let next = self.fallbacks.rewrite(url)?;
        let next_host = next.host_str()?;
        if unreachable_hosts
            .iter()
            .any(|host| host.eq_ignore_ascii_case(next_host))
        {
            return None;
        }
        Some(next)
    }

    /// Streams `body` into the job's scratch path, returning bytes written.
    async fn write_temporary(
        &self,
        job: &DownloadJob,
        url: &Url,
        mut body: BodyStream,
    ) -> Result<u64, TransferError> {
        let file = self
            .fs
            .create(&job.temporary)
            .await
            .map_err(|e| TransferError::io(&job.temporary, e))?;
        let mut writer = BufWriter::new(file);
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| TransferError::from_transport(url.as_str(), &job.destination, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(&job.temporary, e))?;
            bytes_written += chunk.len() as u64;
        }

        // Flushes the buffer and closes the file before the commit rename.
        writer
            .shutdown()
            .await
            .map_err(|e| TransferError::io(&job.temporary, e))?;

        Ok(bytes_written)
    }

    async fn discard_temporary(&self, job: &DownloadJob) {
        match self.fs.remove_file(&job.temporary).await {
            Ok(()) => debug!(path = %job.temporary.display(), "removed partial file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %job.temporary.display(),
                error = %e,
                "could not remove partial file"
            ),
        }
    }
}

/// Parses `raw` and rejects anything that is not an http(s) URL with a host.
pub(crate) fn parse_http_url(raw: &str) -> Result<Url, TransferError> {
    let url = Url::parse(raw).map_err(|_| TransferError::invalid_url(raw))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(TransferError::invalid_url(raw));
    }
    Ok(url)
}
