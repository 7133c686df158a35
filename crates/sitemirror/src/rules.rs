//! The resource rule table shared by discovery and the rewriter.
//!
//! Both stages walk the same rows, so a selector added here is both
//! downloaded and rewritten.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How an attribute value names resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    /// The whole value is one URL.
    #[default]
    Plain,
    /// A `srcset` candidate list.
    Srcset,
    /// A style string with `url(...)` tokens.
    InlineStyle,
}

/// Which stages a rule applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    #[default]
    Both,
    /// Substituted when mapped, but never a download candidate on its own.
    RewriteOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRule {
    pub selector: String,
    pub attributes: Vec<String>,
    #[serde(default)]
    pub extraction: Extraction,
    #[serde(default)]
    pub scope: RuleScope,
}

impl ResourceRule {
    fn new(selector: &str, attributes: &[&str], extraction: Extraction, scope: RuleScope) -> Self {
        Self {
            selector: selector.to_string(),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
            extraction,
            scope,
        }
    }
}

/// Lazy-load and gallery attributes holding a single image URL.
const LAZY_ATTRIBUTES: &[&str] = &[
    "data-original",
    "data-original-hover",
    "data-img-zoom",
    "data-img-zoom-url",
    "data-zoomable-url",
    "data-zoom-target",
    "data-original-item",
    "data-content-cover-bg",
];

#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<ResourceRule>,
}

impl RuleTable {
    pub fn builtin() -> Self {
        use Extraction::*;
        use RuleScope::*;

        let mut rules = vec![
            ResourceRule::new(r#"link[rel~="stylesheet"]"#, &["href"], Plain, Both),
            ResourceRule::new(r#"link[rel~="icon"]"#, &["href"], Plain, Both),
            ResourceRule::new("script[src]", &["src"], Plain, Both),
            ResourceRule::new("img[src]", &["src"], Plain, Both),
            ResourceRule::new("img[srcset]", &["srcset"], Srcset, Both),
            ResourceRule::new("source[src]", &["src"], Plain, Both),
            ResourceRule::new("source[srcset]", &["srcset"], Srcset, Both),
        ];
        for attr in LAZY_ATTRIBUTES {
            rules.push(ResourceRule::new(&format!("[{attr}]"), &[*attr], Plain, Both));
        }
        rules.push(ResourceRule::new(r#"[style*="url("]"#, &["style"], InlineStyle, Both));

        rules.push(ResourceRule::new("link[href]", &["href"], Plain, RewriteOnly));
        rules.push(ResourceRule::new("meta[content]", &["content"], Plain, RewriteOnly));
        rules.push(ResourceRule::new(
            "[data-content-popup-img-url]",
            &["data-content-popup-img-url"],
            Plain,
            RewriteOnly,
        ));

        Self { rules }
    }

    pub fn with_extra(mut self, extra: Vec<ResourceRule>) -> Self {
        self.rules.extend(extra);
        self
    }

    /// Every row, for the rewriter.
    pub fn all(&self) -> &[ResourceRule] {
        &self.rules
    }

    /// Rows that produce download candidates.
    pub fn discovery_rules(&self) -> impl Iterator<Item = &ResourceRule> {
        self.rules.iter().filter(|r| r.scope == RuleScope::Both)
    }

    /// Parse every selector with both HTML engines and check attribute names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.rules {
            validate_selector(&rule.selector)?;
            if rule.attributes.is_empty() {
                return Err(ConfigError::Selector {
                    selector: rule.selector.clone(),
                    reason: "rule names no attributes".to_string(),
                });
            }
            for attr in &rule.attributes {
                if !is_valid_attribute_name(attr) {
                    return Err(ConfigError::Attribute(attr.clone()));
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    scraper::Selector::parse(selector).map_err(|e| ConfigError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })?;
    selector
        .parse::<lol_html::Selector>()
        .map_err(|e| ConfigError::Selector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

/// Attribute names as the HTML tokenizer accepts them.
pub fn is_valid_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '>' | '/' | '=' | '<')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_valid() {
        RuleTable::builtin().validate().unwrap();
    }

    #[test]
    fn rewrite_only_rows_are_not_discovered() {
        let table = RuleTable::builtin();
        assert!(table
            .discovery_rules()
            .all(|r| r.selector != "meta[content]" && r.selector != "link[href]"));
        assert!(table.all().iter().any(|r| r.selector == "meta[content]"));
    }

    #[test]
    fn extra_rules_deserialize_with_defaults() {
        let rule: ResourceRule =
            serde_json::from_str(r#"{"selector": "div[data-bg]", "attributes": ["data-bg"]}"#)
                .unwrap();
        assert_eq!(rule.extraction, Extraction::Plain);
        assert_eq!(rule.scope, RuleScope::Both);

        let table = RuleTable::builtin().with_extra(vec![rule]);
        assert!(table.discovery_rules().any(|r| r.selector == "div[data-bg]"));
    }

    #[test]
    fn attribute_names() {
        assert!(is_valid_attribute_name("data-original"));
        assert!(!is_valid_attribute_name(""));
        assert!(!is_valid_attribute_name("data src"));
        assert!(!is_valid_attribute_name("a=b"));
    }

    #[test]
    fn invalid_selector_rejected() {
        let table = RuleTable::builtin().with_extra(vec![ResourceRule::new(
            "img[",
            &["src"],
            Extraction::Plain,
            RuleScope::Both,
        )]);
        assert!(matches!(table.validate(), Err(ConfigError::Selector { .. })));
    }
}
