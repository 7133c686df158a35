//! Loading the bundled demo configuration.

use std::path::PathBuf;

use sitemirror::{Mirror, MirrorConfig};

// ─────────────────────── helpers ───────────────────────

/// Path of a file under the repository's `demos/` directory.
fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(name)
}

#[test]
fn tilda_demo_loads_and_validates() {
    let config = MirrorConfig::load(&demo("tilda.json")).unwrap();
    config.validate().unwrap();

    assert_eq!(config.discovery.strip_query_params, vec!["t".to_string()]);
    assert_eq!(config.discovery.essential_resources.len(), 12);
    assert_eq!(config.render.close_selector.as_deref(), Some(".t-popup__close"));
    assert_eq!(config.site.pages.len(), 10);
    assert!(config
        .rewrite
        .head_prepend
        .as_deref()
        .is_some_and(|h| h.contains("viewport")));

    // untouched sections keep their defaults
    assert_eq!(config.fetch.request_timeout_ms, 30_000);
    assert_eq!(config.render.hidden_marker.as_deref(), Some("data-sitemirror-hidden"));
}

#[test]
fn tilda_demo_builds_a_mirror() {
    let config = MirrorConfig::load(&demo("tilda.json")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mirror = Mirror::new(config, dir.path()).unwrap();
    assert_eq!(mirror.output_root(), dir.path());
}
