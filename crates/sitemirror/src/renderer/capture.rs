//! Page capture: drive a render context until the DOM has materialized,
//! then hand over a snapshot.
//!
//! Navigation and DOM serialization failures are fatal. The scroll and
//! click phases run under wall-clock budgets; running out of time is fine,
//! a script error there degrades the result to a [`PartialFailure`].

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::RenderContext;
use crate::config::RenderConfig;
use crate::error::{MirrorError, PartialFailure, Stage};
use crate::snapshot::{NetworkResource, PageSnapshot, ResourceType};

/// What the render phase produced: a full snapshot, or a usable one plus
/// the stage that went wrong.
pub type RenderResult = Result<PageSnapshot, PartialFailure>;

const PAGE_HEIGHT_SCRIPT: &str = "document.documentElement.scrollHeight";

const SCROLL_TOP_SCRIPT: &str = "window.scrollTo(0, 0); true";

const NETWORK_SCRIPT: &str = "performance.getEntriesByType('resource')\
    .map(e => ({ url: e.name, initiator: e.initiatorType }))";

const BASE_URI_SCRIPT: &str = "document.baseURI";

#[derive(Debug, Deserialize)]
struct ObservedEntry {
    url: String,
    initiator: String,
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn scroll_script(step: u32) -> String {
    format!(
        "(() => {{ window.scrollBy(0, {step}); \
         return {{ position: window.scrollY + window.innerHeight, \
         height: document.documentElement.scrollHeight }}; }})()"
    )
}

fn count_script(selector: &str) -> String {
    format!("document.querySelectorAll({}).length", js_string(selector))
}

fn click_script(selector: &str, index: u64) -> String {
    format!(
        "((s, i) => {{ const el = document.querySelectorAll(s)[i]; \
         if (!el) return false; el.click(); return true; }})({}, {index})",
        js_string(selector)
    )
}

fn close_script(selector: &str) -> String {
    format!(
        "((s) => {{ let n = 0; document.querySelectorAll(s).forEach(el => {{ \
         if (el.offsetParent !== null) {{ el.click(); n++; }} }}); return n; }})({})",
        js_string(selector)
    )
}

fn mark_hidden_script(marker: &str) -> String {
    format!(
        "((marker) => {{ \
         const skip = new Set(['SCRIPT', 'STYLE', 'SOURCE', 'NOSCRIPT', 'TEMPLATE', 'LINK', 'META', 'BR']); \
         let n = 0; \
         for (const el of (document.body ? document.body.querySelectorAll('*') : [])) {{ \
           if (skip.has(el.tagName)) continue; \
           const visible = typeof el.checkVisibility === 'function' \
             ? el.checkVisibility() \
             : !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length); \
           if (!visible) {{ el.setAttribute(marker, ''); n++; }} \
         }} \
         return n; }})({})",
        js_string(marker)
    )
}

/// Navigate to `url` and capture a snapshot.
pub async fn capture_page(
    ctx: &mut dyn RenderContext,
    url: &str,
    config: &RenderConfig,
) -> Result<RenderResult, MirrorError> {
    let requested =
        Url::parse(url).map_err(|e| MirrorError::NoSnapshot(format!("invalid URL {url}: {e}")))?;

    let started = Instant::now();
    let landed = ctx
        .navigate(url, config.navigation_timeout_ms)
        .await
        .map_err(|e| MirrorError::NoSnapshot(format!("{e:#}")))?;
    info!(url, %landed, elapsed_ms = started.elapsed().as_millis() as u64, "page loaded");

    let mut failure: Option<String> = None;

    match tokio::time::timeout(
        Duration::from_millis(config.scroll_timeout_ms),
        scroll_to_bottom(ctx, config),
    )
    .await
    {
        Ok(Ok(())) => debug!("reached bottom of page"),
        Ok(Err(e)) => failure = Some(format!("scroll failed: {e:#}")),
        Err(_) => debug!(budget_ms = config.scroll_timeout_ms, "scroll budget exhausted"),
    }

    if failure.is_none() && !config.interaction_selectors.is_empty() {
        match tokio::time::timeout(
            Duration::from_millis(config.interaction_timeout_ms),
            interact(ctx, config),
        )
        .await
        {
            Ok(Ok(clicked)) => debug!(clicked, "interaction finished"),
            Ok(Err(e)) => failure = Some(format!("interaction failed: {e:#}")),
            Err(_) => debug!(budget_ms = config.interaction_timeout_ms, "interaction budget exhausted"),
        }
    }

    if let Err(e) = ctx.evaluate(SCROLL_TOP_SCRIPT).await {
        debug!(error = %e, "could not scroll back to top");
    }

    let hidden_marker = match &config.hidden_marker {
        Some(marker) => match ctx.evaluate(&mark_hidden_script(marker)).await {
            Ok(count) => {
                debug!(hidden = count.as_u64().unwrap_or(0), "marked hidden elements");
                Some(marker.clone())
            }
            Err(e) => {
                warn!(error = %e, "could not mark hidden elements, discovery will see all of them");
                None
            }
        },
        None => None,
    };

    let network = collect_network(ctx).await;
    let base_url = base_url(ctx, &requested).await;

    let html = ctx
        .document_html()
        .await
        .map_err(|e| MirrorError::NoSnapshot(format!("{e:#}")))?;

    let mut snapshot = PageSnapshot::new(html, base_url).with_network(network);
    snapshot.hidden_marker = hidden_marker;

    Ok(match failure {
        None => Ok(snapshot),
        Some(reason) => Err(PartialFailure {
            snapshot,
            stage: Stage::Interaction,
            reason,
        }),
    })
}

/// Scroll in steps until the bottom stays put after a settle pause.
async fn scroll_to_bottom(ctx: &dyn RenderContext, config: &RenderConfig) -> anyhow::Result<()> {
    let script = scroll_script(config.scroll_step_px.max(1));
    let pause = Duration::from_millis(config.scroll_pause_ms);
    let settle = Duration::from_millis(config.settle_pause_ms);

    loop {
        let state = ctx.evaluate(&script).await?;
        let position = state["position"].as_f64().unwrap_or(0.0);
        let height = state["height"].as_f64().unwrap_or(0.0);
        tokio::time::sleep(pause).await;

        if position >= height {
            tokio::time::sleep(settle).await;
            let grown = ctx.evaluate(PAGE_HEIGHT_SCRIPT).await?.as_f64().unwrap_or(height);
            if grown <= height {
                return Ok(());
            }
        }
    }
}

/// Click every element matching the configured selectors, dismissing popups
/// after each click. Returns the number of clicks.
async fn interact(ctx: &dyn RenderContext, config: &RenderConfig) -> anyhow::Result<u64> {
    let pause = Duration::from_millis(config.click_pause_ms);
    let mut clicked = 0;

    for selector in &config.interaction_selectors {
        let count = ctx.evaluate(&count_script(selector)).await?.as_u64().unwrap_or(0);
        for index in 0..count {
            if ctx.evaluate(&click_script(selector, index)).await?.as_bool() != Some(true) {
                continue;
            }
            clicked += 1;
            tokio::time::sleep(pause).await;
            if let Some(close) = &config.close_selector {
                ctx.evaluate(&close_script(close)).await?;
            }
        }
    }
    Ok(clicked)
}

async fn collect_network(ctx: &dyn RenderContext) -> Vec<NetworkResource> {
    let value = match ctx.evaluate(NETWORK_SCRIPT).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "could not read network entries");
            return Vec::new();
        }
    };
    let entries: Vec<ObservedEntry> = match serde_json::from_value(value) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "unexpected network entry shape");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|e| {
            ResourceType::from_initiator(&e.initiator, &e.url).map(|resource_type| NetworkResource {
                url: e.url,
                resource_type,
            })
        })
        .collect()
}

/// `document.baseURI`, falling back to the context URL and then the
/// requested URL.
async fn base_url(ctx: &dyn RenderContext, requested: &Url) -> Url {
    if let Ok(value) = ctx.evaluate(BASE_URI_SCRIPT).await {
        if let Some(url) = value.as_str().and_then(|s| Url::parse(s).ok()) {
            return url;
        }
    }
    if let Ok(current) = ctx.current_url().await {
        if let Ok(url) = Url::parse(&current) {
            if matches!(url.scheme(), "http" | "https") {
                return url;
            }
        }
    }
    requested.clone()
}
