//! reqwest-backed transport.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::{Transport, TransportError, TransportResponse};
use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Default User-Agent for mirror traffic.
const USER_AGENT: &str = concat!("mirror/", env!("CARGO_PKG_VERSION"));

/// HTTP transport over a shared reqwest client.
///
/// The client is built without a cookie provider, so `Set-Cookie` headers are
/// ignored and never replayed on later requests. Response bodies are never
/// decoded: a `Content-Encoding: gzip` body is stored as served, and HEAD
/// keeps its `Content-Length`. Create it once and clone it; clones share the
/// connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with the default timeouts (30s connect, 5min total).
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a transport with explicit connect and overall timeouts.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the client cannot be built.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .no_gzip()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn head(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| classify_error(url, &e))?;
        let status = response.status().as_u16();
        debug!(status, "HEAD response");
        Ok(TransportResponse::empty(status, response.headers().clone()))
    }

    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_error(url, &e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        debug!(status, "GET response");

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| TransportError::Body {
                    message: error_chain(&e),
                })
            })
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Maps a reqwest send error onto the transport error kinds.
///
/// Connect failures cover DNS lookup failures as well as refused
/// connections; both are treated as an unreachable host.
fn classify_error(url: &Url, error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::HostUnreachable {
            host: url.host_str().unwrap_or_default().to_string(),
            message: error_chain(error),
        }
    } else {
        TransportError::Network {
            message: error_chain(error),
        }
    }
}

/// Joins an error and its sources, so "dns error" style causes stay visible.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
