//! Remote filename resolution and local filename safety checks.

use std::path::{Component, Path};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::fetcher::parse_http_url;
use crate::transport::Transport;

/// Extension used for video resources when the server names no extension.
///
/// This is a format-specific guess, not a general rule: callers fetching
/// other media should pass their own default to
/// [`FilenameResolver::remote_extension`].
pub const DEFAULT_VIDEO_EXTENSION: &str = "mp4";

/// Looks up the server-side filename of a resource via HEAD.
#[derive(Debug, Clone)]
pub struct FilenameResolver {
    transport: Arc<dyn Transport>,
}

impl FilenameResolver {
    /// Creates a resolver.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Filename from the `Content-Disposition` header of a HEAD response.
    ///
    /// Any status below 400 is accepted (redirect responses included).
    /// Failures, error statuses and missing headers all yield `None`.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn resolve_filename(&self, url: &str) -> Option<String> {
        let parsed = match parse_http_url(url) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(error = %error, "cannot resolve filename");
                return None;
            }
        };

        let response = match self.transport.head(&parsed).await {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "HEAD failed while resolving filename");
                return None;
            }
        };

        if response.status >= 400 {
            warn!(status = response.status, "HTTP error while resolving filename");
            return None;
        }

        let Some(header) = response.content_disposition() else {
            debug!(status = response.status, "no Content-Disposition header");
            return None;
        };

        let filename = parse_content_disposition(header);
        debug!(header, filename = ?filename, "parsed Content-Disposition");
        filename
    }

    /// Extension (without the dot) of the remote filename, or `default`
    /// when no filename resolves or it has no usable extension.
    pub async fn remote_extension(&self, url: &str, default: &str) -> String {
        self.resolve_filename(url)
            .await
            .as_deref()
            .and_then(extension_of)
            .unwrap_or(default)
            .to_string()
    }
}

/// Text after the last `.` of `filename`, when non-empty.
#[must_use]
pub fn extension_of(filename: &str) -> Option<&str> {
    let (_, ext) = filename.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}

/// Parses a `Content-Disposition` header value to extract the filename.
///
/// Handles:
/// - `attachment; filename="example.mp4"`
/// - `attachment; filename=example.mp4`
/// - `attachment; filename*=UTF-8''example%20clip.mp4` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                let decoded = decoded.into_owned();
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();

    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        let filename = &stripped[..end];
        return (!filename.is_empty()).then(|| filename.to_string());
    }

    let end = value.find(';').unwrap_or(value.len());
    let filename = value[..end].trim();
    (!filename.is_empty()).then(|| filename.to_string())
}

/// Whether `name` is usable as a single entry directly inside a directory.
///
/// Rejects empty names, path separators, `.`/`..` and names ending with the
/// fetcher's scratch suffix.
#[must_use]
pub fn is_safe_filename(name: &str) -> bool {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(char::is_control)
        || name.ends_with(super::constants::TEMP_SUFFIX)
    {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
