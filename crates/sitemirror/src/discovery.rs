//! Resource discovery over a rendered snapshot.

use std::collections::{HashMap, HashSet};

use scraper::{Html, Selector};
use tracing::{debug, trace, warn};

use crate::reference::{ReferenceIndex, ResourceUrl, UrlPolicy};
use crate::rules::{Extraction, RuleTable};
use crate::snapshot::{NetworkResource, PageSnapshot, ResourceType};
use crate::syntax::{css_urls, parse_srcset};

/// Download candidates found for one page.
#[derive(Debug, Default)]
pub struct Discovered {
    pub urls: HashSet<ResourceUrl>,
    /// How each raw reference was resolved, for the rewriter.
    pub references: ReferenceIndex,
    /// Resource types reported by the network log.
    pub hints: HashMap<ResourceUrl, ResourceType>,
    /// References rejected during normalization.
    pub skipped: usize,
}

impl Discovered {
    fn record(&mut self, policy: &UrlPolicy, raw: &str) {
        match policy.normalize(raw) {
            Ok(url) => {
                self.references.insert(raw, url.clone());
                self.urls.insert(url);
            }
            Err(reason) => {
                trace!(raw, %reason, "reference skipped");
                self.skipped += 1;
            }
        }
    }

    /// Union in the render layer's network-observed resources.
    pub fn add_observed(&mut self, policy: &UrlPolicy, network: &[NetworkResource]) {
        for resource in network {
            match policy.normalize(&resource.url) {
                Ok(url) => {
                    self.hints.entry(url.clone()).or_insert(resource.resource_type);
                    self.urls.insert(url);
                }
                Err(reason) => {
                    trace!(url = %resource.url, %reason, "network resource skipped");
                    self.skipped += 1;
                }
            }
        }
    }

    /// Union in resources configured as always required.
    pub fn add_essential(&mut self, policy: &UrlPolicy, essential: &[String]) {
        for raw in essential {
            self.record(policy, raw);
        }
    }
}

/// Scan a snapshot's markup for resource references.
pub fn discover(snapshot: &PageSnapshot, rules: &RuleTable, policy: &UrlPolicy) -> Discovered {
    let document = Html::parse_document(&snapshot.html);
    let mut found = Discovered::default();
    let marker = snapshot.hidden_marker.as_deref();

    for rule in rules.discovery_rules() {
        let selector = match Selector::parse(&rule.selector) {
            Ok(s) => s,
            Err(e) => {
                warn!(selector = %rule.selector, error = %e, "skipping unparsable rule");
                continue;
            }
        };

        for element in document.select(&selector) {
            let el = element.value();
            if marker.is_some_and(|m| el.attr(m).is_some()) {
                continue;
            }
            for attr in &rule.attributes {
                let Some(value) = el.attr(attr) else { continue };
                match rule.extraction {
                    Extraction::Plain => found.record(policy, value),
                    Extraction::Srcset => {
                        for candidate in parse_srcset(value) {
                            found.record(policy, &candidate.url);
                        }
                    }
                    Extraction::InlineStyle => {
                        for url in css_urls(value) {
                            found.record(policy, url);
                        }
                    }
                }
            }
        }
    }

    debug!(
        page = %policy.base(),
        candidates = found.urls.len(),
        skipped = found.skipped,
        "discovered resources"
    );
    found
}
