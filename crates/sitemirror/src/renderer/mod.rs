//! Render collaborator seam.
//!
//! The mirror asks a browser for exactly four things per page: load it, run
//! scripts against it, read back the serialized document and the URL it
//! ended up on. [`capture`] builds a snapshot from those calls.

pub mod capture;
#[cfg(feature = "browser")]
pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;

/// A browser that hands out one page per mirrored URL.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn RenderContext>>;
    /// Release the browser. Pages opened afterwards fail.
    async fn shutdown(&self) -> Result<()>;
}

/// One open page.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Load `url` and return the URL the page landed on.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<String>;
    /// Evaluate a script and return its JSON-converted result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
    /// Serialized document, doctype included.
    async fn document_html(&self) -> Result<String>;
    async fn current_url(&self) -> Result<String>;
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Renderer for builds or hosts without a browser: every page fails to open,
/// so every mirror attempt ends with no snapshot.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn open_page(&self) -> Result<Box<dyn RenderContext>> {
        anyhow::bail!("no browser available")
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
