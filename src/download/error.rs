//! Error types for the download module.
//!
//! Every fatal transfer condition names the URL and the destination path,
//! and HTTP failures carry the status code.

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur while fetching or size-checking a resource.
#[derive(Debug, Error)]
pub enum TransferError {
    /// DNS resolution failed or the host refused the connection, and no
    /// fallback rule applied.
    #[error("host {host} unreachable fetching {url} into {path}: {message}")]
    HostUnreachable {
        /// The URL as last attempted (after any host rewrites).
        url: String,
        /// The destination path.
        path: PathBuf,
        /// The unreachable host.
        host: String,
        /// Underlying error text.
        message: String,
    },

    /// Non-2xx response. Never retried here; retry policy belongs to callers.
    #[error("HTTP {status} fetching {url} into {path}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The destination path.
        path: PathBuf,
        /// The HTTP status code.
        status: u16,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url} into {path}")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// The destination path.
        path: PathBuf,
    },

    /// Other network-level failure, including a body stream that broke
    /// mid-transfer.
    #[error("network error fetching {url} into {path}: {message}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The destination path.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },

    /// Filesystem failure (directory creation, write, commit rename).
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL is malformed or has no host.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

/// Coarse classification of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// See [`TransferError::HostUnreachable`].
    HostUnreachable,
    /// See [`TransferError::HttpStatus`].
    HttpStatus(u16),
    /// See [`TransferError::Timeout`].
    Timeout,
    /// See [`TransferError::Network`].
    Network,
    /// See [`TransferError::Io`].
    Io,
    /// See [`TransferError::InvalidUrl`].
    InvalidUrl,
}

impl TransferError {
    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, path: impl Into<PathBuf>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            path: path.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Attaches URL and destination context to a transport failure.
    pub fn from_transport(
        url: impl Into<String>,
        path: impl Into<PathBuf>,
        error: TransportError,
    ) -> Self {
        let url = url.into();
        let path = path.into();
        match error {
            TransportError::HostUnreachable { host, message } => Self::HostUnreachable {
                url,
                path,
                host,
                message,
            },
            TransportError::Timeout => Self::Timeout { url, path },
            TransportError::Network { message } | TransportError::Body { message } => {
                Self::Network { url, path, message }
            }
        }
    }

    /// Returns the coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            Self::HostUnreachable { .. } => TransferErrorKind::HostUnreachable,
            Self::HttpStatus { status, .. } => TransferErrorKind::HttpStatus(*status),
            Self::Timeout { .. } => TransferErrorKind::Timeout,
            Self::Network { .. } => TransferErrorKind::Network,
            Self::Io { .. } => TransferErrorKind::Io,
            Self::InvalidUrl { .. } => TransferErrorKind::InvalidUrl,
        }
    }
}

// No From<TransportError> / From<std::io::Error>: every variant needs a URL
// or path the source error does not have.
