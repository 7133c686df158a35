// Copyright 2026 Sitemirror Contributors
// SPDX-License-Identifier: MIT

//! Sitemirror: self-contained local copies of rendered web pages.
//!
//! A page snapshot goes through discovery, path resolution, fetching and
//! rewriting; every resource it references is downloaded once and every
//! reference in the saved document points at the local copy.

pub mod category;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod pipeline;
pub mod reference;
pub mod renderer;
pub mod resolver;
pub mod retry;
pub mod rewriter;
pub mod rules;
pub mod snapshot;
pub mod store;
pub mod syntax;

pub use config::MirrorConfig;
pub use error::{ConfigError, FetchError, MirrorError, MirrorResult, PartialFailure, Stage};
pub use pipeline::{Mirror, MirrorReport, SaveStatus};
pub use reference::{ResourceUrl, UrlPolicy};
pub use renderer::capture::{capture_page, RenderResult};
pub use renderer::{NoopRenderer, RenderContext, Renderer};
pub use snapshot::{NetworkResource, PageSnapshot, ResourceType};
pub use store::{MappingStore, ResourceMapping};
