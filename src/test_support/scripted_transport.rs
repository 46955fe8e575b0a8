//! Deterministic [`Transport`] for unit tests.
//!
//! Routes are keyed by method and full URL. Hosts can be marked unreachable,
//! bodies can be split into delayed chunks or broken mid-stream, and every
//! request is recorded for later assertions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::transport::{Transport, TransportError, TransportResponse};

/// Canned response for one route.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
    chunk_delay: Option<Duration>,
    broken_after: Option<usize>,
}

impl ScriptedResponse {
    /// 200 with `body` as a single chunk.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            chunks: vec![body.into()],
            chunk_delay: None,
            broken_after: None,
        }
    }

    /// Empty body with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
            chunk_delay: None,
            broken_after: None,
        }
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replaces the body with `chunks`, each delivered after `delay`.
    pub fn chunked(mut self, chunks: Vec<Vec<u8>>, delay: Duration) -> Self {
        self.chunks = chunks;
        self.chunk_delay = Some(delay);
        self
    }

    /// Fails the body stream once `count` chunks have been delivered.
    pub fn broken_after(mut self, count: usize) -> Self {
        self.broken_after = Some(count);
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.insert(name, value);
            }
        }
        map
    }

    fn into_response(self) -> TransportResponse {
        let headers = self.headers();
        let delay = self.chunk_delay;
        let broken_after = self.broken_after;
        let mut items: Vec<Result<Vec<u8>, ()>> = self.chunks.into_iter().map(Ok).collect();
        if let Some(count) = broken_after {
            items.truncate(count);
            items.push(Err(()));
        }
        let body = stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item.map(Bytes::from).map_err(|()| TransportError::Body {
                    message: "connection reset by peer".to_string(),
                })
            })
            .boxed();
        TransportResponse {
            status: self.status,
            headers,
            body,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    routes: HashMap<(String, String), ScriptedResponse>,
    unreachable: HashSet<String>,
    calls: Vec<String>,
}

/// Transport that replays scripted responses. Unknown routes answer 404.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `response` for `GET url`.
    pub fn on_get(self, url: &str, response: ScriptedResponse) -> Self {
        self.route("GET", url, response)
    }

    /// Serves `response` for `HEAD url`.
    pub fn on_head(self, url: &str, response: ScriptedResponse) -> Self {
        self.route("HEAD", url, response)
    }

    /// Every request to `host` fails as unreachable.
    pub fn unreachable(self, host: &str) -> Self {
        self.lock().unreachable.insert(host.to_ascii_lowercase());
        self
    }

    /// Requests seen so far, formatted as `"METHOD url"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn route(self, method: &str, url: &str, response: ScriptedResponse) -> Self {
        self.lock()
            .routes
            .insert((method.to_string(), url.to_string()), response);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, method: &str, url: &Url) -> Result<TransportResponse, TransportError> {
        let mut script = self.lock();
        script.calls.push(format!("{method} {url}"));
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if script.unreachable.contains(&host) {
            return Err(TransportError::HostUnreachable {
                host,
                message: "failed to lookup address information".to_string(),
            });
        }
        let response = script
            .routes
            .get(&(method.to_string(), url.to_string()))
            .cloned()
            .unwrap_or_else(|| ScriptedResponse::status(404));
        Ok(response.into_response())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn head(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        let response = self.answer("HEAD", url)?;
        Ok(TransportResponse::empty(response.status, response.headers))
    }

    async fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        self.answer("GET", url)
    }
}
