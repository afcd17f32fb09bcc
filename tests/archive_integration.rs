//! End-to-end archive runs: policy gating, fetching, extraction, and indexing
//! against a local mock web server and the in-memory index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use archiver_core::allowlist::{AllowListStore, DecisionEngine};
use archiver_core::archive::{ArchiveOptions, Archiver, worker_count};
use archiver_core::index::{MemoryIndex, PAGES, SearchIndex, fingerprint};
use archiver_core::ingest::{IngestOptions, IngestReport, ingest};
use archiver_core::plugin::{PipelineConfig, PluginContext, PluginRegistry};
use archiver_core::{Database, HistoryItem, HistoryStore};
use chrono::Utc;
use futures_util::stream;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

const BLOG_PAGE: &str = r#"<html>
<head>
  <title> Ownership notes </title>
  <meta name="author" content="Ann">
</head>
<body>
  <nav>Home Blog About</nav>
  <main><p>Rust ownership explained</p></main>
</body>
</html>"#;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("temp dir");
    let db = Database::new(&temp_dir.path().join("history.db"))
        .await
        .expect("db");
    (db, temp_dir)
}

async fn allow_prefix(db: &Database, hostname: &str, prefix: &str) {
    let (id,): (i64,) =
        sqlx::query_as("INSERT INTO allow_hosts (hostname, allowed) VALUES (?, 1) RETURNING id")
            .bind(hostname)
            .fetch_one(db.pool())
            .await
            .expect("seed host");
    sqlx::query("INSERT INTO allow_rules (host_id, plugin_id, value) VALUES (?, 'Prefix', ?)")
        .bind(id)
        .bind(prefix)
        .execute(db.pool())
        .await
        .expect("seed rule");
}

fn html_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
}

async fn gate(
    registry: &PluginRegistry,
    db: &Database,
    history: &HistoryStore,
    urls: &[String],
) -> IngestReport {
    let mut engine = DecisionEngine::new(
        AllowListStore::new(db.clone()),
        registry.build_matchers().expect("matchers"),
    );
    engine.enter().await.expect("enter engine");
    let items = stream::iter(
        urls.iter()
            .map(|url| Ok(HistoryItem::new(url.as_str(), None, Utc::now())))
            .collect::<Vec<_>>(),
    );
    let report = ingest(items, &mut engine, history, &IngestOptions::default())
        .await
        .expect("ingest");
    engine.exit().await.expect("exit engine");
    report
}

fn archiver(
    registry: Arc<PluginRegistry>,
    index: Arc<MemoryIndex>,
    history: HistoryStore,
    max_workers: usize,
) -> Archiver {
    Archiver::new(
        registry,
        PipelineConfig::default(),
        PluginContext::default(),
        index,
        history,
        ArchiveOptions {
            max_workers,
            ..ArchiveOptions::default()
        },
    )
    .expect("archiver")
}

fn host_of(server: &MockServer) -> String {
    url::Url::parse(&server.uri())
        .expect("server uri")
        .host_str()
        .expect("server host")
        .to_string()
}

#[tokio::test]
async fn test_archive_fetches_only_allowed_urls() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path("/blog/ownership"))
        .respond_with(html_response(BLOG_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html_response("<p>About</p>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (db, _temp) = setup_db().await;
    allow_prefix(&db, &host_of(&mock_server), "/blog").await;
    let history = HistoryStore::new(db.clone());
    let registry = Arc::new(PluginRegistry::load(Vec::new()).expect("registry"));

    let blog_url = format!("{}/blog/ownership", mock_server.uri());
    let urls = vec![
        blog_url.clone(),
        format!("{}/about", mock_server.uri()),
        "https://evil.com/blog".to_string(),
    ];
    let report = gate(&registry, &db, &history, &urls).await;
    assert_eq!(report.total, 3);
    assert_eq!(report.filtered, 2);
    assert_eq!(report.backlog.len(), 1);

    let index = Arc::new(MemoryIndex::new());
    let stats = archiver(registry.clone(), index.clone(), history.clone(), 4)
        .run(report.backlog)
        .await
        .expect("run");

    assert_eq!(stats.archived(), 1);
    assert_eq!(stats.failed(), 0);
    assert!(!stats.canceled());

    let document = index
        .get(PAGES, &fingerprint(BLOG_PAGE.as_bytes()), &[])
        .await
        .expect("get")
        .expect("document indexed under the content fingerprint");
    assert_eq!(document["url"], blog_url.as_str());
    assert_eq!(document["text"], "Rust ownership explained");
    assert_eq!(document["title"], "Ownership notes");
    assert_eq!(document["author"], "Ann");

    let record = history.find(&blog_url).await.expect("find").expect("record");
    assert!(record.last_scrape.is_some());

    // A second import within the rescrape window skips the page.
    let report = gate(&registry, &db, &history, &[blog_url]).await;
    assert_eq!(report.too_soon, 1);
    assert!(report.backlog.is_empty());
}

#[tokio::test]
async fn test_identical_pages_are_indexed_once() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .respond_with(html_response(BLOG_PAGE))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (db, _temp) = setup_db().await;
    allow_prefix(&db, &host_of(&mock_server), "/blog").await;
    let history = HistoryStore::new(db.clone());
    let registry = Arc::new(PluginRegistry::load(Vec::new()).expect("registry"));

    let urls = vec![
        format!("{}/blog/a", mock_server.uri()),
        format!("{}/blog/b?utm_source=feed", mock_server.uri()),
    ];
    let report = gate(&registry, &db, &history, &urls).await;
    assert_eq!(report.backlog.len(), 2);

    let index = Arc::new(MemoryIndex::new());
    let stats = archiver(registry, index.clone(), history.clone(), 1)
        .run(report.backlog)
        .await
        .expect("run");

    assert_eq!(stats.archived(), 1);
    assert_eq!(stats.duplicates(), 1);
    assert_eq!(index.write_count(), 1);

    // Both URLs count as scraped, so neither is fetched again soon.
    for url in &urls {
        let record = history.find(url).await.expect("find").expect("record");
        assert!(record.last_scrape.is_some(), "{url} should be marked scraped");
    }
}

#[tokio::test]
async fn test_failed_fetch_is_counted_and_not_marked_scraped() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path("/blog/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blog/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&mock_server)
        .await;

    let (db, _temp) = setup_db().await;
    let history = HistoryStore::new(db.clone());
    let registry = Arc::new(PluginRegistry::load(Vec::new()).expect("registry"));
    let backlog: Vec<HistoryItem> = ["/blog/gone", "/blog/feed"]
        .iter()
        .map(|p| HistoryItem::new(format!("{}{p}", mock_server.uri()), None, Utc::now()))
        .collect();

    let index = Arc::new(MemoryIndex::new());
    let stats = archiver(registry, index.clone(), history.clone(), 2)
        .run(backlog.clone())
        .await
        .expect("run");

    assert_eq!(stats.failed(), 2);
    assert_eq!(stats.archived(), 0);
    assert!(index.is_empty());
    for item in &backlog {
        let record = history.find(&item.url).await.expect("find").expect("record");
        assert!(record.last_scrape.is_none());
    }
}

#[tokio::test]
async fn test_cancel_aborts_worker_stuck_on_slow_page() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path("/blog/slow"))
        .respond_with(html_response(BLOG_PAGE).set_delay(Duration::from_secs(20)))
        .mount(&mock_server)
        .await;

    let (db, _temp) = setup_db().await;
    let history = HistoryStore::new(db.clone());
    let registry = Arc::new(PluginRegistry::load(Vec::new()).expect("registry"));
    let index = Arc::new(MemoryIndex::new());
    let archiver = Archiver::new(
        registry,
        PipelineConfig::default(),
        PluginContext::default(),
        index.clone(),
        history,
        ArchiveOptions {
            max_workers: 1,
            poll_interval: Duration::from_millis(50),
            dequeue_timeout: Duration::from_millis(10),
            grace_period: Duration::from_millis(200),
        },
    )
    .expect("archiver");

    let cancel = archiver.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let backlog = vec![HistoryItem::new(
        format!("{}/blog/slow", mock_server.uri()),
        None,
        Utc::now(),
    )];
    let stats = archiver.run(backlog).await.expect("run");

    assert!(stats.canceled());
    assert_eq!(stats.archived(), 0);
    assert!(index.is_empty());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "shutdown took {:?}",
        started.elapsed()
    );
}

#[test]
fn test_worker_count_halves_backlog_within_bounds() {
    assert_eq!(worker_count(3, 8), 1);
    assert_eq!(worker_count(1, 8), 1);
    assert_eq!(worker_count(40, 8), 8);
    assert_eq!(worker_count(10, 8), 5);
}
