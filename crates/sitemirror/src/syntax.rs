//! The three ways an attribute can name a resource: a plain URL, a `srcset`
//! candidate list, or CSS `url(...)` tokens inside a style string.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

/// `url(...)` with optional quotes. Group 1 is the URL.
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#)
        .expect("CSS_URL: hardcoded regex is valid")
});

/// One `srcset` image candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcsetCandidate {
    pub url: String,
    /// Width or density descriptor (`640w`, `2x`); empty when absent.
    pub descriptor: String,
}

/// Split a `srcset` value into candidates.
///
/// The URL is the run of non-whitespace characters, so commas inside a URL
/// (common on image CDNs) survive. Descriptors run to the next comma outside
/// parentheses.
pub fn parse_srcset(value: &str) -> Vec<SrcsetCandidate> {
    let mut out = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let url = &rest[..end];
        rest = &rest[end..];

        if url.ends_with(',') {
            let url = url.trim_end_matches(',');
            if !url.is_empty() {
                out.push(SrcsetCandidate {
                    url: url.to_string(),
                    descriptor: String::new(),
                });
            }
            continue;
        }

        let mut depth = 0usize;
        let mut cut = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    cut = i;
                    break;
                }
                _ => {}
            }
        }
        let descriptor = rest[..cut].split_ascii_whitespace().collect::<Vec<_>>().join(" ");
        rest = &rest[cut..];

        out.push(SrcsetCandidate {
            url: url.to_string(),
            descriptor,
        });
    }

    out
}

/// Serialize candidates back into a `srcset` value.
pub fn format_srcset(candidates: &[SrcsetCandidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            if c.descriptor.is_empty() {
                c.url.clone()
            } else {
                format!("{} {}", c.url, c.descriptor)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// URLs named by `url(...)` tokens in a style string.
pub fn css_urls(style: &str) -> Vec<&str> {
    CSS_URL
        .captures_iter(style)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Replace the URL inside each `url(...)` token for which `lookup` returns a
/// substitute. Everything outside the matched URL text is kept verbatim.
///
/// Returns the new string and the number of substitutions.
pub fn replace_css_urls<F>(style: &str, mut lookup: F) -> (String, usize)
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(style.len());
    let mut last = 0;
    let mut replaced = 0;

    for caps in CSS_URL.captures_iter(style) {
        let Some(m) = caps.get(1) else { continue };
        if let Some(local) = lookup(m.as_str()) {
            out.push_str(&style[last..m.start()]);
            out.push_str(&local);
            last = m.end();
            replaced += 1;
        }
    }
    out.push_str(&style[last..]);
    (out, replaced)
}

/// Attribute that carries a value through the parser in [`decode_entities`].
const CARRIER_ATTR: &str = "data-v";

/// Decode the character references that appear in attribute values.
///
/// The streaming rewriter sees raw attribute text while the tree parser used
/// by discovery sees decoded text. Values are decoded by that same parser so
/// both sides agree on every named and numeric reference.
pub fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }

    // A literal `"` only occurs in single-quoted source; `&quot;` decodes to it.
    let markup = format!("<a {CARRIER_ATTR}=\"{}\"></a>", value.replace('"', "&quot;"));
    let fragment = Html::parse_fragment(&markup);
    let decoded = fragment.tree.nodes().find_map(|node| {
        node.value()
            .as_element()
            .and_then(|el| el.attr(CARRIER_ATTR))
            .map(str::to_string)
    });

    match decoded {
        Some(decoded) if decoded != value => Cow::Owned(decoded),
        _ => Cow::Borrowed(value),
    }
}
