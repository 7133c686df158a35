//! Headless Chromium render collaborator over chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{RenderContext, Renderer};
use crate::config::RenderConfig;

/// Environment variable pointing at a Chromium binary.
pub const CHROMIUM_ENV: &str = "SITEMIRROR_CHROMIUM_PATH";

/// Chrome-for-Testing layouts under `~/.sitemirror/chromium`.
#[cfg(target_os = "macos")]
const BUNDLED: &[&str] = &[
    "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome",
];
#[cfg(not(target_os = "macos"))]
const BUNDLED: &[&str] = &["chrome-linux64/chrome", "chrome"];

const ON_PATH: &[&str] = &["google-chrome", "chromium", "chromium-browser"];

const MACOS_APP: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

const OUTER_HTML_SCRIPT: &str = "(document.doctype \
    ? new XMLSerializer().serializeToString(document.doctype) + '\\n' \
    : '') + document.documentElement.outerHTML";

/// Locate a Chromium binary: the env override, then a bundled download,
/// then `PATH`, then the stock macOS install.
pub fn find_chromium() -> Option<PathBuf> {
    let explicit = std::env::var_os(CHROMIUM_ENV).map(PathBuf::from);
    let bundled = dirs::home_dir().into_iter().flat_map(|home| {
        let dir = home.join(".sitemirror").join("chromium");
        BUNDLED.iter().map(move |rel| dir.join(rel))
    });

    explicit
        .into_iter()
        .chain(bundled)
        .find(|p| p.is_file())
        .or_else(|| ON_PATH.iter().find_map(|name| which::which(name).ok()))
        .or_else(|| {
            cfg!(target_os = "macos")
                .then(|| PathBuf::from(MACOS_APP))
                .filter(|p| p.is_file())
        })
}

/// One headless browser shared by every page of a run.
pub struct ChromiumRenderer {
    browser: Mutex<Option<Browser>>,
    events: JoinHandle<()>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium with the configured window size and user agent.
    pub async fn launch(config: &RenderConfig, user_agent: &str) -> Result<Self> {
        let executable = find_chromium()
            .with_context(|| format!("Chromium not found; set {CHROMIUM_ENV} or install Chrome"))?;
        info!(path = %executable.display(), "launching Chromium");

        let browser_config = BrowserConfig::builder()
            .chrome_executable(executable)
            .no_sandbox()
            .window_size(config.window_width, config.window_height)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={user_agent}"))
            .build()
            .map_err(|e| anyhow::anyhow!("invalid browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("failed to launch Chromium")?;

        // The CDP connection only makes progress while its event stream is polled.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser event error");
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            events,
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open_page(&self) -> Result<Box<dyn RenderContext>> {
        let guard = self.browser.lock().await;
        let Some(browser) = guard.as_ref() else {
            bail!("browser has been shut down");
        };
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open page")?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        let closed = browser.close().await.context("failed to close Chromium");
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "waiting for Chromium to exit failed");
        }
        self.events.abort();
        closed.map(|_| ())
    }
}

/// A browser tab.
pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl RenderContext for ChromiumPage {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<String> {
        // `goto` resolves once the load event has fired.
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await {
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context(format!("navigation to {url} failed"))),
            Ok(Ok(_)) => Ok(self
                .current_url()
                .await
                .unwrap_or_else(|_| url.to_string())),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .context("script failed")?
            .into_value::<serde_json::Value>()
            .context("script result is not JSON")
    }

    async fn document_html(&self) -> Result<String> {
        self.page
            .evaluate(OUTER_HTML_SCRIPT)
            .await
            .context("failed to serialize document")?
            .into_value::<String>()
            .context("serialized document is not a string")
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .context("failed to read page URL")?
            .unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await.context("failed to close page")
    }
}
