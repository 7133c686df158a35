//! Path resolution: category, thumbnail routing and collision-free local
//! filenames.

use std::path::PathBuf;
use std::sync::Arc;

use md5::{Digest, Md5};
use regex::Regex;
use tracing::debug;

use crate::category::{classify, Category};
use crate::config::ResolveConfig;
use crate::error::ConfigError;
use crate::http::HttpClient;
use crate::reference::{ResourceUrl, SkipReason};
use crate::snapshot::ResourceType;
use crate::store::MappingStore;

const MAX_STEM_LEN: usize = 100;

/// Where one resource is stored, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub original_url: ResourceUrl,
    pub local_path: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Record(ResourceRecord),
    Skip(SkipReason),
}

/// Compiled resolver settings, built once per mirror.
#[derive(Debug, Clone)]
pub struct ResolvePolicy {
    thumbnail_patterns: Vec<Regex>,
    thumbnail_max_bytes: u64,
    head_size_check: bool,
    placeholder_names: Vec<String>,
}

impl ResolvePolicy {
    pub fn from_config(config: &ResolveConfig) -> Result<Self, ConfigError> {
        let thumbnail_patterns = config
            .thumbnail_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| ConfigError::Pattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            thumbnail_patterns,
            thumbnail_max_bytes: config.thumbnail_max_bytes,
            head_size_check: config.head_size_check,
            placeholder_names: config
                .placeholder_names
                .iter()
                .map(|n| n.to_ascii_lowercase())
                .collect(),
        })
    }

    fn is_placeholder(&self, basename: &str) -> bool {
        let lower = basename.to_ascii_lowercase();
        self.placeholder_names.iter().any(|n| *n == lower)
    }
}

/// What the fetcher knows about a resource when asking for its path.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub url: &'a ResourceUrl,
    pub content_type: Option<&'a str>,
    pub hint: Option<ResourceType>,
    /// Size reported by [`Resolver::reported_size`] before the download.
    pub reported_len: Option<u64>,
    /// Size of the downloaded body, used when the server reported none.
    pub body_len: Option<u64>,
}

pub struct Resolver {
    root: PathBuf,
    store: Arc<MappingStore>,
    client: HttpClient,
    policy: ResolvePolicy,
}

impl Resolver {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<MappingStore>,
        client: HttpClient,
        policy: ResolvePolicy,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            client,
            policy,
        }
    }

    /// Classify `url` and reserve a unique local path for it.
    pub fn resolve(&self, req: ResolveRequest<'_>) -> Resolution {
        if !req.url.is_fetchable() {
            let reason = match req.url.scheme() {
                "data" => SkipReason::DataUri,
                other => SkipReason::UnsupportedScheme(other.to_string()),
            };
            return Resolution::Skip(reason);
        }

        let mut spec = classify(req.url, req.content_type, req.hint);
        if spec.category == Category::Image
            && self.is_thumbnail(req.url, req.reported_len, req.body_len)
        {
            spec.category = Category::Thumbnail;
        }

        let local_path = self.allocate(req.url, spec.subdirectory(), &spec.extension);
        debug!(url = %req.url, path = %local_path, category = ?spec.category, "resolved");

        Resolution::Record(ResourceRecord {
            original_url: req.url.clone(),
            local_path,
            category: spec.category,
        })
    }

    /// Give back the path of a record whose file was never written.
    pub fn release(&self, record: &ResourceRecord) {
        self.store.release(&record.local_path);
    }

    /// Ask the server for the size of a likely image before downloading it.
    ///
    /// Returns `None` when the size check is off, when the URL alone does not look
    /// like an image, when a thumbnail pattern already decides it, or when the
    /// server reports no usable size.
    pub async fn reported_size(&self, url: &ResourceUrl, hint: Option<ResourceType>) -> Option<u64> {
        if !self.policy.head_size_check
            || classify(url, None, hint).category != Category::Image
            || self.matches_thumbnail_pattern(url)
        {
            return None;
        }

        match self.client.head(url.as_str()).await {
            Ok(head) if (200..300).contains(&head.status) => head.content_length.filter(|n| *n > 0),
            Ok(head) => {
                debug!(url = %url, status = head.status, "size request rejected");
                None
            }
            Err(e) => {
                debug!(url = %url, error = %e, "size request failed");
                None
            }
        }
    }

    fn matches_thumbnail_pattern(&self, url: &ResourceUrl) -> bool {
        self.policy
            .thumbnail_patterns
            .iter()
            .any(|p| p.is_match(url.as_str()))
    }

    fn is_thumbnail(
        &self,
        url: &ResourceUrl,
        reported_len: Option<u64>,
        body_len: Option<u64>,
    ) -> bool {
        self.matches_thumbnail_pattern(url)
            || reported_len
                .or(body_len)
                .is_some_and(|n| n < self.policy.thumbnail_max_bytes)
    }

    fn allocate(&self, url: &ResourceUrl, dir: &str, extension: &str) -> String {
        let basename = decoded_basename(url);
        let stem = sanitize_stem(&basename);
        let hash = url_hash(url);

        if !self.policy.is_placeholder(&basename) {
            let plain = format!("{dir}/{stem}{extension}");
            if self.store.try_reserve(&self.root, &plain) {
                return plain;
            }
        }

        let hashed = format!("{dir}/{stem}_{hash}{extension}");
        if self.store.try_reserve(&self.root, &hashed) {
            return hashed;
        }

        let mut n = 2u32;
        loop {
            let numbered = format!("{dir}/{stem}_{hash}_{n}{extension}");
            if self.store.try_reserve(&self.root, &numbered) {
                return numbered;
            }
            n = n.saturating_add(1);
        }
    }
}

/// First 8 hex characters of the MD5 digest of the URL.
pub fn url_hash(url: &ResourceUrl) -> String {
    let digest = Md5::digest(url.as_str().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(8);
    hex
}

fn decoded_basename(url: &ResourceUrl) -> String {
    let segment = url.path().rsplit('/').next().unwrap_or_default();
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Filename stem: extension dropped, reduced to `[A-Za-z0-9._-]`.
fn sanitize_stem(basename: &str) -> String {
    let stem = match basename.rfind('.') {
        Some(dot)
            if dot > 0
                && basename.len() - dot <= 6
                && basename[dot + 1..].chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            &basename[..dot]
        }
        _ => basename,
    };

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    let cleaned = cleaned.trim_matches('.');

    if cleaned.is_empty() {
        "index".to_string()
    } else {
        cleaned.to_string()
    }
}
