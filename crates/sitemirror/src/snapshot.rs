//! Inputs handed over by the render collaborator.

use serde::{Deserialize, Serialize};
use url::Url;

/// Resource types the render layer reports from the network log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Script,
    Stylesheet,
    Image,
    Font,
}

const FONT_EXTENSIONS: &[&str] = &[".woff", ".woff2", ".ttf", ".eot", ".otf"];

impl ResourceType {
    /// Map a Performance API `initiatorType` to a resource type.
    ///
    /// Requests initiated from CSS are either fonts or images; the URL
    /// extension tells them apart. Navigations, XHR and fetch are dropped.
    pub fn from_initiator(initiator: &str, url: &str) -> Option<Self> {
        match initiator {
            "script" => Some(ResourceType::Script),
            "link" => Some(ResourceType::Stylesheet),
            "img" | "image" => Some(ResourceType::Image),
            "css" => {
                let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
                if FONT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
                    Some(ResourceType::Font)
                } else {
                    Some(ResourceType::Image)
                }
            }
            _ => None,
        }
    }
}

/// A URL observed on the wire while the page loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResource {
    pub url: String,
    pub resource_type: ResourceType,
}

/// A fully materialized document plus what the render layer saw loading.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// Serialized DOM after scrolling and interaction.
    pub html: String,
    /// Effective base URL for resolving relative references.
    pub base_url: Url,
    /// Network-observed resources.
    pub network: Vec<NetworkResource>,
    /// Attribute the render layer set on elements it judged invisible.
    pub hidden_marker: Option<String>,
}

impl PageSnapshot {
    pub fn new(html: impl Into<String>, base_url: Url) -> Self {
        Self {
            html: html.into(),
            base_url,
            network: Vec::new(),
            hidden_marker: None,
        }
    }

    pub fn with_network(mut self, network: Vec<NetworkResource>) -> Self {
        self.network = network;
        self
    }

    pub fn with_hidden_marker(mut self, marker: impl Into<String>) -> Self {
        self.hidden_marker = Some(marker.into());
        self
    }
}
