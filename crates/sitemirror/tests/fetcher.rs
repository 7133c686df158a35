//! Fetcher integration tests against a local HTTP server.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use sitemirror::config::MirrorConfig;
use sitemirror::error::FetchError;
use sitemirror::fetcher::{Fetcher, JobOutcome};
use sitemirror::http::HttpClient;
use sitemirror::resolver::{ResolvePolicy, Resolver};
use sitemirror::retry::RetryPolicy;
use sitemirror::{MappingStore, ResourceUrl};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─────────────────────── helpers ───────────────────────

fn fetcher(root: &Path, store: Arc<MappingStore>, size_check: bool) -> Fetcher {
    let mut config = MirrorConfig::default();
    config.fetch.retry_delay_ms = 10;
    config.fetch.request_timeout_ms = 5000;
    config.resolve.head_size_check = size_check;

    let client = HttpClient::new(&config.fetch);
    let resolver = Resolver::new(
        root,
        Arc::clone(&store),
        client.clone(),
        ResolvePolicy::from_config(&config.resolve).unwrap(),
    );
    Fetcher::new(
        root,
        store,
        client,
        resolver,
        RetryPolicy::from_config(&config.fetch),
    )
}

fn url(server: &MockServer, p: &str) -> ResourceUrl {
    ResourceUrl::parse(&format!("{}{p}", server.uri())).unwrap()
}

fn no_hints() -> HashMap<ResourceUrl, sitemirror::ResourceType> {
    HashMap::new()
}

async fn serve(server: &MockServer, p: &str, status: u16, content_type: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(p))
        .respond_with(ResponseTemplate::new(status).set_body_raw(body, content_type))
        .mount(server)
        .await;
}

// ─────────────────────── dedup ───────────────────────

#[tokio::test]
async fn same_url_is_downloaded_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/css/site.css"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("body{margin:0}", "text/css"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MappingStore::new());
    let f = fetcher(dir.path(), Arc::clone(&store), false);
    let css = url(&server, "/css/site.css");

    let first = f.fetch_all(vec![css.clone(), css.clone()], &no_hints()).await;
    assert_eq!(first.saved(), 1);
    assert_eq!(first.mapping.get(css.as_str()), Some("css/site.css"));

    let second = f.fetch_all(vec![css.clone()], &no_hints()).await;
    assert_eq!(second.saved(), 0);
    assert_eq!(second.already_mapped, 1);
    assert_eq!(store.len(), 1);

    assert_eq!(
        std::fs::read_to_string(dir.path().join("css/site.css")).unwrap(),
        "body{margin:0}"
    );
}

// ─────────────────────── failures ───────────────────────

#[tokio::test]
async fn not_found_is_requested_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.js"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MappingStore::new());
    let f = fetcher(dir.path(), Arc::clone(&store), false);

    let report = f.fetch_all(vec![url(&server, "/missing.js")], &no_hints()).await;
    assert_eq!(report.not_found(), 1);
    assert!(store.is_empty());
    assert!(matches!(report.jobs[0].outcome, JobOutcome::NotFound));
}

#[tokio::test]
async fn empty_body_creates_no_mapping_and_no_file() {
    let server = MockServer::start().await;
    serve(&server, "/empty.css", 200, "text/css", Vec::new()).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MappingStore::new());
    let f = fetcher(dir.path(), Arc::clone(&store), false);

    let report = f.fetch_all(vec![url(&server, "/empty.css")], &no_hints()).await;
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.jobs[0].outcome,
        JobOutcome::Failed(FetchError::EmptyBody)
    ));
    assert!(store.is_empty());
    assert!(!dir.path().join("css").exists());
}

#[tokio::test]
async fn server_errors_exhaust_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.js"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MappingStore::new());
    let f = fetcher(dir.path(), Arc::clone(&store), false);

    let report = f.fetch_all(vec![url(&server, "/flaky.js")], &no_hints()).await;
    assert_eq!(report.failed(), 1);
    assert_eq!(report.jobs[0].attempts_remaining, 0);
    assert!(matches!(
        report.jobs[0].outcome,
        JobOutcome::Failed(FetchError::Status(500))
    ));
    assert!(store.is_empty());
}

#[tokio::test]
async fn forbidden_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private.png"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let f = fetcher(dir.path(), Arc::new(MappingStore::new()), false);

    let report = f.fetch_all(vec![url(&server, "/private.png")], &no_hints()).await;
    assert!(matches!(
        report.jobs[0].outcome,
        JobOutcome::Failed(FetchError::Status(403))
    ));
}

#[tokio::test]
async fn transient_failure_then_success_is_saved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    serve(&server, "/app.js", 200, "application/javascript", b"run()".to_vec()).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MappingStore::new());
    let f = fetcher(dir.path(), Arc::clone(&store), false);

    let report = f.fetch_all(vec![url(&server, "/app.js")], &no_hints()).await;
    assert_eq!(report.saved(), 1);
    assert_eq!(report.jobs[0].attempts_remaining, 1);
    assert_eq!(store.get(url(&server, "/app.js").as_str()).as_deref(), Some("js/app.js"));
}

// ─────────────────────── paths ───────────────────────

#[tokio::test]
async fn reported_size_decides_thumbnail_routing() {
    let server = MockServer::start().await;
    // HEAD and GET disagree so the reported size alone decides.
    for (p, reported, served) in [
        ("/small/pic.jpg", 3 * 1024, 50 * 1024),
        ("/large/pic.jpg", 50 * 1024, 3 * 1024),
    ] {
        Mock::given(method("HEAD"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; reported], "image/jpeg"))
            .expect(1)
            .mount(&server)
            .await;
        serve(&server, p, 200, "image/jpeg", vec![0u8; served]).await;
    }

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MappingStore::new());
    let f = fetcher(dir.path(), Arc::clone(&store), true);
    let small = url(&server, "/small/pic.jpg");
    let large = url(&server, "/large/pic.jpg");

    let report = f.fetch_all(vec![small.clone(), large.clone()], &no_hints()).await;
    assert_eq!(report.saved(), 2);
    assert_eq!(report.mapping.get(small.as_str()), Some("images/thumbnails/pic.jpg"));
    assert_eq!(report.mapping.get(large.as_str()), Some("images/pic.jpg"));
    assert_eq!(
        std::fs::metadata(dir.path().join("images/thumbnails/pic.jpg")).unwrap().len(),
        50 * 1024
    );
}

#[tokio::test]
async fn body_size_routes_thumbnails_without_a_size_request() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    for (p, size) in [("/small/pic.jpg", 3 * 1024), ("/large/pic.jpg", 50 * 1024)] {
        serve(&server, p, 200, "image/jpeg", vec![0u8; size]).await;
    }

    let dir = tempfile::tempdir().unwrap();
    let f = fetcher(dir.path(), Arc::new(MappingStore::new()), false);
    let small = url(&server, "/small/pic.jpg");
    let large = url(&server, "/large/pic.jpg");

    let report = f.fetch_all(vec![small.clone(), large.clone()], &no_hints()).await;
    assert_eq!(report.mapping.get(small.as_str()), Some("images/thumbnails/pic.jpg"));
    assert_eq!(report.mapping.get(large.as_str()), Some("images/pic.jpg"));
}

#[tokio::test]
async fn stylesheets_are_never_sized_up_front() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    serve(&server, "/site.css", 200, "text/css", b"p{}".to_vec()).await;

    let dir = tempfile::tempdir().unwrap();
    let f = fetcher(dir.path(), Arc::new(MappingStore::new()), true);
    let css = url(&server, "/site.css");

    let report = f.fetch_all(vec![css.clone()], &no_hints()).await;
    assert_eq!(report.mapping.get(css.as_str()), Some("css/site.css"));
}

#[tokio::test]
async fn colliding_basenames_get_unique_paths() {
    let server = MockServer::start().await;
    let mut urls = Vec::new();
    for i in 0..6 {
        let p = format!("/v{i}/logo.png");
        serve(&server, &p, 200, "image/png", vec![7u8; 8000]).await;
        urls.push(url(&server, &p));
    }

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MappingStore::new());
    let f = fetcher(dir.path(), Arc::clone(&store), false);

    let report = f.fetch_all(urls.clone(), &no_hints()).await;
    assert_eq!(report.saved(), 6);

    let paths: HashSet<&str> = urls
        .iter()
        .map(|u| report.mapping.get(u.as_str()).unwrap())
        .collect();
    assert_eq!(paths.len(), 6);
    assert!(paths.contains("images/logo.png"));
    for p in &paths {
        assert!(dir.path().join(p).exists());
    }
}

#[tokio::test]
async fn network_hint_classifies_extensionless_urls() {
    let server = MockServer::start().await;
    serve(&server, "/loader", 200, "application/octet-stream", b"x()".to_vec()).await;

    let dir = tempfile::tempdir().unwrap();
    let f = fetcher(dir.path(), Arc::new(MappingStore::new()), false);
    let loader = url(&server, "/loader");
    let hints = HashMap::from([(loader.clone(), sitemirror::ResourceType::Script)]);

    let report = f.fetch_all(vec![loader.clone()], &hints).await;
    assert_eq!(report.mapping.get(loader.as_str()), Some("js/loader.js"));
}
