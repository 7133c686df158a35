//! Configuration loading and resolution.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Platform-specific data (essential assets, interaction selectors,
//! initialization markup) only ever comes from here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rules::{is_valid_attribute_name, RuleTable};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "SITEMIRROR_CONFIG";

/// Config file picked up from the working directory.
pub const CONFIG_FILE: &str = "sitemirror.json";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                  AppleWebKit/537.36 (KHTML, like Gecko) \
                                  Chrome/131.0.0.0 Safari/537.36";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub fetch: FetchConfig,
    pub resolve: ResolveConfig,
    pub discovery: DiscoveryConfig,
    pub rewrite: RewriteConfig,
    pub render: RenderConfig,
    pub site: SiteConfig,
}

/// Transport and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Attempts per resource, including the first.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    /// Timeout for thumbnail size requests.
    pub head_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            request_timeout_ms: 30_000,
            head_timeout_ms: 10_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Path allocation and thumbnail detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Images strictly smaller than this many bytes are thumbnails.
    pub thumbnail_max_bytes: u64,
    /// Regexes matched against the full URL.
    pub thumbnail_patterns: Vec<String>,
    /// Generic filenames that are always hashed.
    pub placeholder_names: Vec<String>,
    /// Issue a HEAD request to size images not matched by a pattern.
    pub head_size_check: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            thumbnail_max_bytes: 5 * 1024,
            thumbnail_patterns: vec![
                r"/-/resize".to_string(),
                r"/20x/".to_string(),
                r"/thumb/".to_string(),
                r"/thumbnails/".to_string(),
            ],
            placeholder_names: vec!["noroot.png".to_string()],
            head_size_check: true,
        }
    }
}

/// Which references are candidates for download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Hosts whose URLs are never fetched (video embeds and the like).
    pub excluded_hosts: Vec<String>,
    /// Query parameters dropped during normalization (cache busters).
    pub strip_query_params: Vec<String>,
    /// Absolute URLs always mirrored, whether or not the page references them.
    pub essential_resources: Vec<String>,
    /// Rules appended to the built-in table.
    pub extra_rules: Vec<crate::rules::ResourceRule>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            excluded_hosts: vec![
                "www.youtube.com".to_string(),
                "youtube.com".to_string(),
                "player.vimeo.com".to_string(),
            ],
            strip_query_params: Vec::new(),
            essential_resources: Vec::new(),
            extra_rules: Vec::new(),
        }
    }
}

/// Markup injected into the saved document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Inserted as the first children of `<head>`.
    pub head_prepend: Option<String>,
    /// Inserted as the last children of `<body>`.
    pub body_append: Option<String>,
}

/// Browser capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub navigation_timeout_ms: u64,
    /// Wall-clock budget for the scroll phase.
    pub scroll_timeout_ms: u64,
    pub scroll_step_px: u32,
    pub scroll_pause_ms: u64,
    /// Pause after reaching the bottom, before checking whether the page grew.
    pub settle_pause_ms: u64,
    /// Wall-clock budget for the click phase.
    pub interaction_timeout_ms: u64,
    /// Elements clicked to trigger lazy galleries and popups.
    pub interaction_selectors: Vec<String>,
    /// Clicked after each interaction to dismiss popups.
    pub close_selector: Option<String>,
    pub click_pause_ms: u64,
    /// Attribute set on invisible elements before the DOM is serialized.
    pub hidden_marker: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30_000,
            scroll_timeout_ms: 60_000,
            scroll_step_px: 400,
            scroll_pause_ms: 500,
            settle_pause_ms: 3000,
            interaction_timeout_ms: 60_000,
            interaction_selectors: Vec::new(),
            close_selector: None,
            click_pause_ms: 1000,
            hidden_marker: Some("data-sitemirror-hidden".to_string()),
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// Pages mirrored by `sitemirror site`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: Option<String>,
    pub output_root: String,
    pub pages: Vec<PageEntry>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            output_root: "dist".to_string(),
            pages: Vec::new(),
        }
    }
}

/// One page of a site: URL path relative to the base, and the directory
/// (relative to the output root) its mirror goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub path: String,
    #[serde(default)]
    pub output: String,
}

impl MirrorConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: MirrorConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that would otherwise fail halfway through a page.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pattern in &self.resolve.thumbnail_patterns {
            regex::Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
        }

        RuleTable::builtin()
            .with_extra(self.discovery.extra_rules.clone())
            .validate()?;

        if let Some(marker) = &self.render.hidden_marker {
            if !is_valid_attribute_name(marker) {
                return Err(ConfigError::Attribute(marker.clone()));
            }
        }

        for raw in &self.discovery.essential_resources {
            url::Url::parse(raw).map_err(|e| ConfigError::Url {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Some(base) = &self.site.base_url {
            url::Url::parse(base).map_err(|e| ConfigError::Url {
                url: base.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}

/// Resolve the config file path: explicit flag, then `SITEMIRROR_CONFIG`,
/// then `./sitemirror.json`.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}

/// Load the resolved config file, or fall back to built-in defaults.
pub fn load_config(explicit: Option<&str>) -> Result<MirrorConfig, ConfigError> {
    match resolve_config_path(explicit) {
        Some(path) => MirrorConfig::load(&path),
        None => Ok(MirrorConfig::default()),
    }
}
