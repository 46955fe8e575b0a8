//! Host fallback rules applied when a host cannot be reached.
//!
//! A rule maps a legacy alias host to its successor. When a request to the
//! alias fails with an unreachable host, the fetcher rewrites the URL host and
//! tries again. Rules are data, supplied by configuration.

use serde::{Deserialize, Serialize};
use url::Url;

/// One alias → successor host mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFallbackRule {
    /// Host that may have vanished, e.g. `farm0.static.example.com`.
    pub alias: String,
    /// Host that serves the same paths, e.g. `farm1.static.example.com`.
    pub successor: String,
}

impl HostFallbackRule {
    /// Creates a rule.
    pub fn new(alias: impl Into<String>, successor: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            successor: successor.into(),
        }
    }
}

/// Ordered set of fallback rules. Host matching is exact and ASCII
/// case-insensitive; the first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFallbacks {
    rules: Vec<HostFallbackRule>,
}

impl HostFallbacks {
    /// Builds the rule set.
    pub fn new(rules: impl IntoIterator<Item = HostFallbackRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// No fallbacks: every unreachable host is fatal.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Number of rules, which is also the most rewrites one job may perform.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The configured rules.
    #[must_use]
    pub fn rules(&self) -> &[HostFallbackRule] {
        &self.rules
    }

    /// Successor host for `host`, if an alias rule matches.
    #[must_use]
    pub fn successor_for(&self, host: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.alias.eq_ignore_ascii_case(host))
            .map(|rule| rule.successor.as_str())
    }

    /// `url` with its host replaced by the matching successor.
    ///
    /// Scheme, port, path and query are preserved. Returns `None` when no
    /// rule matches or the successor is not a valid host.
    #[must_use]
    pub fn rewrite(&self, url: &Url) -> Option<Url> {
        let successor = self.successor_for(url.host_str()?)?;
        let mut rewritten = url.clone();
        rewritten.set_host(Some(successor)).ok()?;
        Some(rewritten)
    }
}
