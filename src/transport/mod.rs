//! Transport boundary: HEAD/GET requests with cookie persistence disabled.
//!
//! The core never talks to reqwest directly. It consumes the [`Transport`]
//! trait, which returns the status, headers and a body stream for a request.
//! [`HttpTransport`] is the production implementation.

mod http;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, HeaderMap};
use thiserror::Error;
use url::Url;

pub use http::HttpTransport;

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Failures below the HTTP status layer.
///
/// These carry no destination context; the fetcher and verifier wrap them into
/// [`TransferError`](crate::download::TransferError) with URL and path.
#[derive(Debug, Error)]
pub enum TransportError {
    /// DNS resolution failed or the host refused/dropped the connection.
    #[error("host {host} unreachable: {message}")]
    HostUnreachable {
        /// Host component of the requested URL.
        host: String,
        /// Underlying error text.
        message: String,
    },

    /// Connect or overall request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Any other request failure (TLS, protocol, redirect loop, ...).
    #[error("request failed: {message}")]
    Network {
        /// Underlying error text.
        message: String,
    },

    /// Reading the body stream failed after headers were received.
    #[error("body read failed: {message}")]
    Body {
        /// Underlying error text.
        message: String,
    },
}

/// Response metadata plus a body stream.
///
/// HEAD responses carry an empty body.
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: BodyStream,
}

impl TransportResponse {
    /// Builds a response with an empty body.
    #[must_use]
    pub fn empty(status: u16, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            body: Box::pin(stream::empty()),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of the `Content-Length` header, if present and numeric.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Raw `Content-Disposition` header value, if present and valid UTF-8.
    #[must_use]
    pub fn content_disposition(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// HEAD/GET capability consumed by the fetcher, verifier and filename resolver.
///
/// Implementations must not persist or replay cookies between requests.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Issues a HEAD request.
    async fn head(&self, url: &Url) -> Result<TransportResponse, TransportError>;

    /// Issues a GET request; the body is streamed lazily.
    async fn get(&self, url: &Url) -> Result<TransportResponse, TransportError>;
}
