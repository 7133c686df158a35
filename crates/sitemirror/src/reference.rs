//! Resource URL normalization.
//!
//! Every reference is resolved against the page's base URL the moment it is
//! discovered. Later stages only ever see absolute `http(s)` URLs.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use url::Url;

use crate::config::DiscoveryConfig;

/// Normalized absolute URL of a resource.
///
/// Equality is by the normalized string. Constructed through
/// [`UrlPolicy::normalize`] or [`ResourceUrl::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceUrl(String);

impl ResourceUrl {
    /// Parse an absolute URL without applying any discovery policy.
    /// The fragment is dropped.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(raw.trim())?;
        url.set_fragment(None);
        Ok(Self(url.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the scheme is one the fetcher can download.
    pub fn is_fetchable(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    pub fn scheme(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// The path component, without query or fragment.
    pub fn path(&self) -> &str {
        let after_scheme = match self.0.find("://") {
            Some(i) => &self.0[i + 3..],
            None => return "",
        };
        let path_start = match after_scheme.find('/') {
            Some(i) => i,
            None => return "/",
        };
        let path = &after_scheme[path_start..];
        let end = path.find(['?', '#']).unwrap_or(path.len());
        &path[..end]
    }
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceUrl {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Why a raw reference is not a download candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Fragment,
    /// Embedded content, never fetched.
    DataUri,
    UnsupportedScheme(String),
    ExcludedHost(String),
    /// The page referencing itself.
    SelfReference,
    Invalid(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Empty => f.write_str("empty reference"),
            SkipReason::Fragment => f.write_str("fragment-only reference"),
            SkipReason::DataUri => f.write_str("data: URI"),
            SkipReason::UnsupportedScheme(s) => write!(f, "unsupported scheme `{s}`"),
            SkipReason::ExcludedHost(h) => write!(f, "excluded host `{h}`"),
            SkipReason::SelfReference => f.write_str("reference to the page itself"),
            SkipReason::Invalid(e) => write!(f, "invalid URL: {e}"),
        }
    }
}

/// Normalization rules for one page.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    base: Url,
    page: String,
    excluded_hosts: Vec<String>,
    strip_query_params: Vec<String>,
}

impl UrlPolicy {
    pub fn new(base: Url, config: &DiscoveryConfig) -> Self {
        let mut page = base.clone();
        page.set_fragment(None);
        Self {
            base,
            page: page.into(),
            excluded_hosts: config
                .excluded_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            strip_query_params: config.strip_query_params.clone(),
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve a raw reference into an absolute download candidate.
    pub fn normalize(&self, raw: &str) -> Result<ResourceUrl, SkipReason> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SkipReason::Empty);
        }
        if trimmed.starts_with('#') {
            return Err(SkipReason::Fragment);
        }
        if trimmed
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
        {
            return Err(SkipReason::DataUri);
        }

        let mut url = self
            .base
            .join(trimmed)
            .map_err(|e| SkipReason::Invalid(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SkipReason::UnsupportedScheme(other.to_string())),
        }

        if let Some(host) = url.host_str() {
            let host = host.to_ascii_lowercase();
            if self.excluded_hosts.iter().any(|h| *h == host) {
                return Err(SkipReason::ExcludedHost(host));
            }
        }

        url.set_fragment(None);
        self.strip_params(&mut url);

        if url.as_str() == self.page {
            return Err(SkipReason::SelfReference);
        }
        Ok(ResourceUrl(url.into()))
    }

    fn strip_params(&self, url: &mut Url) {
        if self.strip_query_params.is_empty() || url.query().is_none() {
            return;
        }
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let kept: Vec<&(String, String)> = pairs
            .iter()
            .filter(|(k, _)| !self.strip_query_params.iter().any(|p| p == k))
            .collect();
        if kept.len() == pairs.len() {
            return;
        }
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }
}

/// Raw attribute value → normalized URL, as seen during discovery.
///
/// Lets the rewriter map relative or protocol-relative references without
/// resolving anything itself.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    by_raw: HashMap<String, ResourceUrl>,
}

impl ReferenceIndex {
    pub fn insert(&mut self, raw: &str, url: ResourceUrl) {
        self.by_raw.entry(raw.trim().to_string()).or_insert(url);
    }

    pub fn resolve(&self, raw: &str) -> Option<&ResourceUrl> {
        self.by_raw.get(raw.trim())
    }

    pub fn len(&self) -> usize {
        self.by_raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_raw.is_empty()
    }
}
