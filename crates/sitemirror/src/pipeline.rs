//! Pipeline orchestration: discovery, fetch, rewrite, save.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::category::MANAGED_ENTRIES;
use crate::config::MirrorConfig;
use crate::discovery::discover;
use crate::error::{MirrorError, MirrorResult, PartialFailure, Stage};
use crate::fetcher::{FetchReport, Fetcher};
use crate::http::HttpClient;
use crate::reference::UrlPolicy;
use crate::renderer::capture::{capture_page, RenderResult};
use crate::renderer::Renderer;
use crate::resolver::{ResolvePolicy, Resolver};
use crate::retry::RetryPolicy;
use crate::rewriter::Rewriter;
use crate::rules::RuleTable;
use crate::snapshot::PageSnapshot;
use crate::store::MappingStore;

/// How the saved document came about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Clean,
    Degraded { stage: Stage, reason: String },
}

/// Summary of one mirrored page.
#[derive(Debug, Clone)]
pub struct MirrorReport {
    pub index_path: PathBuf,
    pub status: SaveStatus,
    pub discovered: usize,
    pub saved: usize,
    pub not_found: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl MirrorReport {
    pub fn is_clean(&self) -> bool {
        self.status == SaveStatus::Clean
    }
}

/// Mirrors pages into one output root.
pub struct Mirror {
    config: MirrorConfig,
    rules: RuleTable,
    resolve: ResolvePolicy,
    client: HttpClient,
    output_root: PathBuf,
}

impl Mirror {
    /// Validate `config` and prepare a mirror writing under `output_root`.
    pub fn new(config: MirrorConfig, output_root: impl Into<PathBuf>) -> MirrorResult<Self> {
        config.validate()?;
        let rules = RuleTable::builtin().with_extra(config.discovery.extra_rules.clone());
        let resolve = ResolvePolicy::from_config(&config.resolve)?;
        let client = HttpClient::new(&config.fetch);

        Ok(Self {
            config,
            rules,
            resolve,
            client,
            output_root: output_root.into(),
        })
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Render `url` with `renderer` and mirror the result.
    pub async fn mirror_url(&self, renderer: &dyn Renderer, url: &str) -> MirrorResult<MirrorReport> {
        let mut ctx = renderer
            .open_page()
            .await
            .map_err(|e| MirrorError::NoSnapshot(format!("{e:#}")))?;

        let rendered = capture_page(ctx.as_mut(), url, &self.config.render).await;
        if let Err(e) = ctx.close().await {
            warn!(error = %e, "failed to close render context");
        }

        self.mirror(rendered?).await
    }

    /// Mirror a rendered page. A [`PartialFailure`] is still mirrored, and
    /// the save is reported as degraded.
    pub async fn mirror(&self, rendered: RenderResult) -> MirrorResult<MirrorReport> {
        let (snapshot, mut failure) = match rendered {
            Ok(snapshot) => (snapshot, None),
            Err(PartialFailure {
                snapshot,
                stage,
                reason,
            }) => {
                warn!(page = %snapshot.base_url, %stage, %reason, "render stage failed, continuing with partial snapshot");
                (snapshot, Some((stage, reason)))
            }
        };

        let policy = UrlPolicy::new(snapshot.base_url.clone(), &self.config.discovery);
        let mut found = discover(&snapshot, &self.rules, &policy);
        found.add_observed(&policy, &snapshot.network);
        found.add_essential(&policy, &self.config.discovery.essential_resources);
        let discovered = found.urls.len();

        let store = Arc::new(MappingStore::new());
        let report = match self.prepare_output().await {
            Ok(()) => {
                let fetcher = self.fetcher(Arc::clone(&store));
                fetcher.fetch_all(found.urls.iter().cloned(), &found.hints).await
            }
            Err(e) => {
                warn!(root = %self.output_root.display(), error = %e, "could not prepare output root");
                failure.get_or_insert((Stage::Output, e.to_string()));
                FetchReport::default()
            }
        };

        let html = match self.rewrite(&snapshot, &report, &found.references) {
            Ok(html) => html,
            Err(e) => {
                failure.get_or_insert((Stage::Rewrite, e.to_string()));
                snapshot.html.clone()
            }
        };

        let index_path = self.save(&html).await?;

        let status = match failure {
            None => {
                info!(path = %index_path.display(), saved = report.saved(), "saved mirror");
                SaveStatus::Clean
            }
            Some((stage, reason)) => {
                warn!(path = %index_path.display(), %stage, %reason, "saved degraded mirror");
                SaveStatus::Degraded { stage, reason }
            }
        };

        Ok(MirrorReport {
            index_path,
            status,
            discovered,
            saved: report.saved(),
            not_found: report.not_found(),
            failed: report.failed(),
            skipped: found.skipped + report.skipped(),
        })
    }

    fn fetcher(&self, store: Arc<MappingStore>) -> Fetcher {
        let resolver = Resolver::new(
            &self.output_root,
            Arc::clone(&store),
            self.client.clone(),
            self.resolve.clone(),
        );
        Fetcher::new(
            &self.output_root,
            store,
            self.client.clone(),
            resolver,
            RetryPolicy::from_config(&self.config.fetch),
        )
    }

    fn rewrite(
        &self,
        snapshot: &PageSnapshot,
        report: &FetchReport,
        references: &crate::reference::ReferenceIndex,
    ) -> MirrorResult<String> {
        let rewritten = Rewriter::new(&self.rules, &self.config.rewrite)
            .with_hidden_marker(snapshot.hidden_marker.as_deref())
            .rewrite(&snapshot.html, &report.mapping, references)?;
        Ok(rewritten.html)
    }

    /// Remove the managed entries of the output root so each run starts
    /// clean. Other entries (nested page roots) are left alone.
    async fn prepare_output(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.output_root).await?;
        for entry in MANAGED_ENTRIES {
            let path = self.output_root.join(entry);
            match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await?,
                Ok(_) => tokio::fs::remove_file(&path).await?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn save(&self, html: &str) -> MirrorResult<PathBuf> {
        tokio::fs::create_dir_all(&self.output_root).await?;
        let path = self.output_root.join("index.html");
        tokio::fs::write(&path, html).await?;
        Ok(path)
    }
}
