// Copyright 2026 Sitemirror Contributors
// SPDX-License-Identifier: MIT

//! Sitemirror command-line entry point.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use url::Url;

use sitemirror::config::{load_config, resolve_config_path, PageEntry};
use sitemirror::renderer::chromium::ChromiumRenderer;
use sitemirror::{Mirror, MirrorConfig, MirrorReport, Renderer, SaveStatus};

#[derive(Parser)]
#[command(
    name = "sitemirror",
    about = "Save rendered web pages as self-contained local copies",
    version
)]
struct Cli {
    /// Path to a JSON config file (falls back to SITEMIRROR_CONFIG, then ./sitemirror.json).
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a single page.
    Page {
        /// Page URL.
        url: String,

        /// Output directory (defaults to the configured output root).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Mirror every page listed in the config's `site` section.
    Site {
        /// Output root (defaults to the configured output root).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Remove the whole output root before mirroring.
        #[arg(long)]
        clean: bool,
    },

    /// Print the effective configuration as JSON.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   sitemirror completions bash > ~/.local/share/bash-completion/completions/sitemirror
    ///   sitemirror completions zsh > ~/.zfunc/_sitemirror
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Page { url, output } => {
            let config = load(cli.config.as_deref())?;
            let root = output.unwrap_or_else(|| PathBuf::from(&config.site.output_root));
            let renderer = launch(&config).await?;

            let result = mirror_page(&*renderer, config, &root, &url).await;
            shutdown(&*renderer).await;
            print_report(&url, &result?);
        }

        Commands::Site { output, clean } => {
            let config = load(cli.config.as_deref())?;
            let Some(base) = config.site.base_url.clone() else {
                bail!("the `site` command needs site.base_url in the config");
            };
            let base = Url::parse(&base).with_context(|| format!("invalid site.base_url {base}"))?;
            if config.site.pages.is_empty() {
                bail!("site.pages is empty; nothing to mirror");
            }

            let root = output.unwrap_or_else(|| PathBuf::from(&config.site.output_root));
            if clean && root.exists() {
                tracing::info!(root = %root.display(), "removing previous output");
                tokio::fs::remove_dir_all(&root)
                    .await
                    .with_context(|| format!("failed to remove {}", root.display()))?;
            }
            let renderer = launch(&config).await?;

            let mut failures = 0usize;
            for page in &config.site.pages {
                let url = page_url(&base, page)?;
                let dir = root.join(page_output(page));
                tracing::info!(%url, dir = %dir.display(), "mirroring page");

                match mirror_page(&*renderer, config.clone(), &dir, url.as_str()).await {
                    Ok(report) => print_report(url.as_str(), &report),
                    Err(e) => {
                        failures += 1;
                        tracing::error!(%url, error = %e, "page could not be mirrored");
                    }
                }
            }
            shutdown(&*renderer).await;

            if failures > 0 {
                bail!("{failures} of {} pages could not be mirrored", config.site.pages.len());
            }
        }

        Commands::Config => {
            let config = load(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sitemirror", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn load(explicit: Option<&str>) -> anyhow::Result<MirrorConfig> {
    match resolve_config_path(explicit) {
        Some(path) => tracing::info!("Config: {}", path.display()),
        None => tracing::info!("Config: built-in defaults"),
    }
    Ok(load_config(explicit)?)
}

async fn launch(config: &MirrorConfig) -> anyhow::Result<Box<dyn Renderer>> {
    let renderer = ChromiumRenderer::launch(&config.render, &config.fetch.user_agent).await?;
    Ok(Box::new(renderer))
}

async fn shutdown(renderer: &dyn Renderer) {
    if let Err(e) = renderer.shutdown().await {
        tracing::warn!(error = %e, "renderer shutdown failed");
    }
}

async fn mirror_page(
    renderer: &dyn Renderer,
    config: MirrorConfig,
    root: &Path,
    url: &str,
) -> anyhow::Result<MirrorReport> {
    let mirror = Mirror::new(config, root)?;
    Ok(mirror.mirror_url(renderer, url).await?)
}

fn page_url(base: &Url, page: &PageEntry) -> anyhow::Result<Url> {
    base.join(&page.path)
        .with_context(|| format!("invalid page path {:?}", page.path))
}

/// Output directory of a page relative to the output root.
fn page_output(page: &PageEntry) -> &str {
    let out = if page.output.is_empty() {
        page.path.as_str()
    } else {
        page.output.as_str()
    };
    out.trim_matches('/')
}

fn print_report(url: &str, report: &MirrorReport) {
    println!("{url}");
    println!("  Saved to: {}", report.index_path.display());
    println!(
        "  Resources: {} discovered, {} saved, {} not found, {} failed, {} skipped",
        report.discovered, report.saved, report.not_found, report.failed, report.skipped
    );
    if let SaveStatus::Degraded { stage, reason } = &report.status {
        println!("  Degraded at {stage} stage: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, output: &str) -> PageEntry {
        PageEntry {
            path: path.into(),
            output: output.into(),
        }
    }

    #[test]
    fn page_output_prefers_explicit_dir() {
        assert_eq!(page_output(&entry("", "")), "");
        assert_eq!(page_output(&entry("ru/", "")), "ru");
        assert_eq!(page_output(&entry("en/about", "about")), "about");
    }

    #[test]
    fn page_url_joins_relative_paths() {
        let base = Url::parse("https://example.com/").unwrap();
        assert_eq!(
            page_url(&base, &entry("", "")).unwrap().as_str(),
            "https://example.com/"
        );
        assert_eq!(
            page_url(&base, &entry("ru", "")).unwrap().as_str(),
            "https://example.com/ru"
        );
    }

    #[test]
    fn cli_parses_page_command() {
        let cli = Cli::try_parse_from(["sitemirror", "page", "https://example.com", "-o", "out"])
            .unwrap();
        match cli.command {
            Commands::Page { url, output } => {
                assert_eq!(url, "https://example.com");
                assert_eq!(output, Some(PathBuf::from("out")));
            }
            _ => panic!("expected page command"),
        }
        assert_eq!(cli.log_level, "info");
    }
}
