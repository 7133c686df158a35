//! Document rewriting using lol_html for streaming HTML processing.
//!
//! Walks the same rule table as discovery and substitutes mapped references.
//! Unmapped references are left pointing at their remote URL.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use lol_html::html_content::ContentType;
use lol_html::{element, HtmlRewriter, Settings};
use tracing::{debug, warn};

use crate::config::RewriteConfig;
use crate::error::MirrorError;
use crate::reference::ReferenceIndex;
use crate::rules::{Extraction, RuleTable};
use crate::store::ResourceMapping;
use crate::syntax::{decode_entities, format_srcset, parse_srcset, replace_css_urls, SrcsetCandidate};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    /// Attribute values changed.
    pub attributes: usize,
    /// srcset candidates removed because their URL was not mapped.
    pub srcset_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct Rewritten {
    pub html: String,
    pub stats: RewriteStats,
}

/// Mapping lookups for raw attribute text.
struct Lookup<'m> {
    mapping: &'m ResourceMapping,
    references: &'m ReferenceIndex,
}

impl Lookup<'_> {
    fn local_for(&self, raw: &str) -> Option<&str> {
        let key = raw.trim();
        if key.is_empty() {
            return None;
        }
        self.mapping.get(key).or_else(|| {
            self.references
                .resolve(key)
                .and_then(|url| self.mapping.get(url.as_str()))
        })
    }

    /// Returns the new value and the number of dropped candidates, or `None`
    /// when no candidate is mapped.
    fn srcset(&self, value: &str) -> Option<(String, usize)> {
        let mut kept = Vec::new();
        let mut dropped = 0;
        for candidate in parse_srcset(value) {
            match self.local_for(&candidate.url) {
                Some(local) => kept.push(SrcsetCandidate {
                    url: local.to_string(),
                    descriptor: candidate.descriptor,
                }),
                None => dropped += 1,
            }
        }
        if kept.is_empty() {
            return None;
        }
        Some((format_srcset(&kept), dropped))
    }
}

pub struct Rewriter<'a> {
    rules: &'a RuleTable,
    config: &'a RewriteConfig,
    hidden_marker: Option<&'a str>,
}

impl<'a> Rewriter<'a> {
    pub fn new(rules: &'a RuleTable, config: &'a RewriteConfig) -> Self {
        Self {
            rules,
            config,
            hidden_marker: None,
        }
    }

    /// Strip this attribute from every element in the output.
    pub fn with_hidden_marker(mut self, marker: Option<&'a str>) -> Self {
        self.hidden_marker = marker;
        self
    }

    /// Rewrite `html` against a final mapping. Never touches the store.
    pub fn rewrite(
        &self,
        html: &str,
        mapping: &ResourceMapping,
        references: &ReferenceIndex,
    ) -> Result<Rewritten, MirrorError> {
        let lookup = Lookup {
            mapping,
            references,
        };
        let changed = Cell::new(0usize);
        let dropped = Cell::new(0usize);
        // Attributes of the current element already owned by a rule.
        let handled: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
        let lookup = &lookup;
        let changed = &changed;
        let dropped = &dropped;
        let handled = &handled;

        // Handlers for one element run in registration order, so this one
        // resets the per-element state before any rule sees the element.
        let mut handlers = vec![element!("*", move |_el| {
            handled.borrow_mut().clear();
            Ok(())
        })];

        for rule in self.rules.all() {
            if rule.selector.parse::<lol_html::Selector>().is_err() {
                warn!(selector = %rule.selector, "skipping unparsable rule");
                continue;
            }
            handlers.push(element!(rule.selector.as_str(), move |el| {
                for attr in &rule.attributes {
                    let Some(raw) = el.get_attribute(attr) else {
                        continue;
                    };
                    // The first rule to match an attribute rewrites it from
                    // its original value; later rows would see a local path.
                    if !handled.borrow_mut().insert(attr.clone()) {
                        continue;
                    }
                    let value = decode_entities(&raw);
                    let replacement = match rule.extraction {
                        Extraction::Plain => lookup.local_for(&value).map(str::to_string),
                        Extraction::Srcset => lookup.srcset(&value).map(|(v, n)| {
                            dropped.set(dropped.get() + n);
                            v
                        }),
                        Extraction::InlineStyle => {
                            let (v, n) = replace_css_urls(&value, |u| {
                                lookup.local_for(u).map(str::to_string)
                            });
                            (n > 0).then_some(v)
                        }
                    };
                    if let Some(new_value) = replacement {
                        if new_value != value {
                            el.set_attribute(attr, &new_value)?;
                            changed.set(changed.get() + 1);
                        }
                    }
                }
                Ok(())
            }));
        }

        if let Some(markup) = self.config.head_prepend.as_deref() {
            handlers.push(element!("head", move |el| {
                el.prepend(markup, ContentType::Html);
                Ok(())
            }));
        }
        if let Some(markup) = self.config.body_append.as_deref() {
            handlers.push(element!("body", move |el| {
                el.append(markup, ContentType::Html);
                Ok(())
            }));
        }

        let marker_selector = self.hidden_marker.map(|m| format!("[{m}]"));
        if let (Some(marker), Some(selector)) = (self.hidden_marker, marker_selector.as_deref()) {
            if selector.parse::<lol_html::Selector>().is_ok() {
                handlers.push(element!(selector, move |el| {
                    el.remove_attribute(marker);
                    Ok(())
                }));
            }
        }

        let mut output = Vec::with_capacity(html.len());
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: handlers,
                ..Settings::default()
            },
            |c: &[u8]| output.extend_from_slice(c),
        );

        rewriter
            .write(html.as_bytes())
            .map_err(|e| MirrorError::Rewrite(e.to_string()))?;
        rewriter
            .end()
            .map_err(|e| MirrorError::Rewrite(e.to_string()))?;

        let html = String::from_utf8(output).map_err(|e| MirrorError::Rewrite(e.to_string()))?;
        let stats = RewriteStats {
            attributes: changed.get(),
            srcset_dropped: dropped.get(),
        };
        debug!(
            attributes = stats.attributes,
            srcset_dropped = stats.srcset_dropped,
            "rewrote document"
        );
        Ok(Rewritten { html, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ResourceUrl;

    fn mapping(pairs: &[(&str, &str)]) -> ResourceMapping {
        pairs
            .iter()
            .map(|(u, p)| (ResourceUrl::parse(u).unwrap(), p.to_string()))
            .collect()
    }

    fn rewrite(html: &str, map: &ResourceMapping, refs: &ReferenceIndex) -> Rewritten {
        let rules = RuleTable::builtin();
        let config = RewriteConfig::default();
        Rewriter::new(&rules, &config).rewrite(html, map, refs).unwrap()
    }

    #[test]
    fn plain_attributes_use_mapping_or_stay() {
        let map = mapping(&[("https://a.test/site.css", "css/site.css")]);
        let out = rewrite(
            r#"<link rel="stylesheet" href="https://a.test/site.css"><script src="https://a.test/app.js"></script>"#,
            &map,
            &ReferenceIndex::default(),
        );
        assert!(out.html.contains(r#"href="css/site.css""#));
        assert!(out.html.contains(r#"src="https://a.test/app.js""#));
        assert_eq!(out.stats.attributes, 1);
    }

    #[test]
    fn relative_references_go_through_index() {
        let map = mapping(&[("https://a.test/img/x.png", "images/x.png")]);
        let mut refs = ReferenceIndex::default();
        refs.insert("img/x.png", ResourceUrl::parse("https://a.test/img/x.png").unwrap());
        let out = rewrite(r#"<img src="img/x.png">"#, &map, &refs);
        assert_eq!(out.html, r#"<img src="images/x.png">"#);
    }

    #[test]
    fn srcset_drops_unmapped_entries() {
        let map = mapping(&[("https://a.test/a.jpg", "images/a.jpg")]);
        let out = rewrite(
            r#"<img srcset="https://a.test/a.jpg 1x, https://a.test/b.jpg 2x">"#,
            &map,
            &ReferenceIndex::default(),
        );
        assert_eq!(out.html, r#"<img srcset="images/a.jpg 1x">"#);
        assert_eq!(out.stats.srcset_dropped, 1);
    }

    #[test]
    fn fully_unmapped_srcset_is_untouched() {
        let out = rewrite(
            r#"<img srcset="https://a.test/a.jpg 1x, https://a.test/b.jpg 2x">"#,
            &ResourceMapping::default(),
            &ReferenceIndex::default(),
        );
        assert_eq!(
            out.html,
            r#"<img srcset="https://a.test/a.jpg 1x, https://a.test/b.jpg 2x">"#
        );
    }

    #[test]
    fn inline_style_substitution_is_local() {
        let map = mapping(&[("https://a.test/x.png", "images/x.png")]);
        let mut refs = ReferenceIndex::default();
        refs.insert("x.png", ResourceUrl::parse("https://a.test/x.png").unwrap());
        let out = rewrite(
            r#"<div style="color:red;background-image:url(x.png)"></div>"#,
            &map,
            &refs,
        );
        assert_eq!(
            out.html,
            r#"<div style="color:red;background-image:url(images/x.png)"></div>"#
        );
    }

    #[test]
    fn overlapping_rules_rewrite_an_attribute_once() {
        let map = mapping(&[
            ("https://cdn.test/site.css", "css/site.css"),
            ("https://site.test/css/site.css", "css/site_1234abcd.css"),
        ]);
        let mut refs = ReferenceIndex::default();
        refs.insert(
            "css/site.css",
            ResourceUrl::parse("https://site.test/css/site.css").unwrap(),
        );
        let out = rewrite(
            r#"<link rel="stylesheet icon" href="https://cdn.test/site.css"><link rel="stylesheet" href="css/site.css">"#,
            &map,
            &refs,
        );
        assert_eq!(
            out.html,
            r#"<link rel="stylesheet icon" href="css/site.css"><link rel="stylesheet" href="css/site_1234abcd.css">"#
        );
        assert_eq!(out.stats.attributes, 2);
    }

    #[test]
    fn entity_encoded_values_match() {
        let map = mapping(&[("https://a.test/f?a=1&b=2", "other/f")]);
        let out = rewrite(
            r#"<img src="https://a.test/f?a=1&amp;b=2">"#,
            &map,
            &ReferenceIndex::default(),
        );
        assert_eq!(out.html, r#"<img src="other/f">"#);
    }

    #[test]
    fn named_entities_match_discovery_keys() {
        let url = ResourceUrl::parse("https://a.test/a.png?s=2\u{d7}3").unwrap();
        let map: ResourceMapping = [(url.clone(), "images/a.png".to_string())]
            .into_iter()
            .collect();
        let mut refs = ReferenceIndex::default();
        refs.insert("a.png?s=2\u{d7}3", url);
        let out = rewrite(r#"<img src="a.png?s=2&times;3">"#, &map, &refs);
        assert_eq!(out.html, r#"<img src="images/a.png">"#);
    }

    #[test]
    fn rewrite_only_rows_apply() {
        let map = mapping(&[("https://a.test/og.png", "images/og.png")]);
        let out = rewrite(
            r#"<meta property="og:image" content="https://a.test/og.png"><div data-content-popup-img-url="https://a.test/og.png"></div>"#,
            &map,
            &ReferenceIndex::default(),
        );
        assert!(out.html.contains(r#"content="images/og.png""#));
        assert!(out.html.contains(r#"data-content-popup-img-url="images/og.png""#));
    }

    #[test]
    fn injects_markup_and_strips_marker() {
        let rules = RuleTable::builtin();
        let config = RewriteConfig {
            head_prepend: Some(r#"<meta name="viewport" content="width=device-width">"#.into()),
            body_append: Some("<script>init()</script>".into()),
        };
        let out = Rewriter::new(&rules, &config)
            .with_hidden_marker(Some("data-sm-hidden"))
            .rewrite(
                r#"<html><head><title>t</title></head><body><p data-sm-hidden="1">x</p></body></html>"#,
                &ResourceMapping::default(),
                &ReferenceIndex::default(),
            )
            .unwrap();
        assert_eq!(
            out.html,
            r#"<html><head><meta name="viewport" content="width=device-width"><title>t</title></head><body><p>x</p><script>init()</script></body></html>"#
        );
    }
}
