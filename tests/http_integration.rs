//! Page downloader and Elasticsearch index against a local mock server.

use archiver_core::http::ClientOptions;
use archiver_core::index::{ElasticsearchIndex, IndexError, PAGES, SearchIndex};
use archiver_core::pipeline::{Content, Downloader, TEXT_HTML, content_types};
use archiver_core::plugins::HttpDownloader;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

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

async fn entered_downloader() -> HttpDownloader {
    let mut downloader = HttpDownloader::new(ClientOptions::default());
    downloader.enter().await.expect("enter");
    downloader
}

#[tokio::test]
async fn test_downloader_returns_body_and_charset() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"<p>caf\xe9</p>".to_vec(), "text/html; charset=ISO-8859-1"),
        )
        .mount(&mock_server)
        .await;

    let mut downloader = entered_downloader().await;
    let url = Url::parse(&format!("{}/page", mock_server.uri())).expect("url");
    let result = downloader
        .download(&url, &content_types([TEXT_HTML]))
        .await
        .expect("download")
        .expect("page");

    assert_eq!(result.content_type, TEXT_HTML);
    assert_eq!(result.encoding.as_deref(), Some("ISO-8859-1"));
    assert_eq!(result.content, Content::Bytes(b"<p>caf\xe9</p>".to_vec()));
    assert_eq!(result.request_url, url);
}

#[tokio::test]
async fn test_downloader_follows_redirects() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<p>moved</p>", "text/html"))
        .mount(&mock_server)
        .await;

    let mut downloader = entered_downloader().await;
    let url = Url::parse(&format!("{}/old", mock_server.uri())).expect("url");
    let result = downloader
        .download(&url, &content_types([TEXT_HTML]))
        .await
        .expect("download")
        .expect("page");

    assert_eq!(result.url.path(), "/new");
    assert_eq!(result.request_url.path(), "/old");
}

#[tokio::test]
async fn test_downloader_skips_errors_and_non_html() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/image"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0_u8; 8], "image/png"))
        .mount(&mock_server)
        .await;

    let mut downloader = entered_downloader().await;
    for page in ["/missing", "/image"] {
        let url = Url::parse(&format!("{}{page}", mock_server.uri())).expect("url");
        let result = downloader
            .download(&url, &content_types([TEXT_HTML]))
            .await
            .expect("download");
        assert!(result.is_none(), "{page} should not produce content");
    }
    downloader.exit().await.expect("exit");
}

fn es_index(uri: &str) -> ElasticsearchIndex {
    ElasticsearchIndex::new(uri, Some("elastic"), Some("secret"), &ClientOptions::default())
        .expect("index client")
}

#[tokio::test]
async fn test_ensure_pages_index_creates_missing_index() {
    let mock_server = require_mock_server!();
    Mock::given(method("HEAD"))
        .and(path("/pages"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/pages"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "mappings": { "properties": { "url": { "type": "keyword" } } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let index = es_index(&mock_server.uri());
    assert!(index.ensure_pages_index().await.expect("ensure"));
}

#[tokio::test]
async fn test_ensure_pages_index_keeps_existing_index() {
    let mock_server = require_mock_server!();
    Mock::given(method("HEAD"))
        .and(path("/pages"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let index = es_index(&mock_server.uri());
    assert!(!index.ensure_pages_index().await.expect("ensure"));
}

#[tokio::test]
async fn test_document_exists_index_and_get() {
    let mock_server = require_mock_server!();
    Mock::given(method("HEAD"))
        .and(path("/pages/_doc/abc"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/pages/_doc/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/pages/_doc/abc"))
        .and(body_partial_json(json!({"url": "https://example.com/"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pages/_doc/abc"))
        .and(query_param("_source_includes", "text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "abc",
            "found": true,
            "_source": {"url": "https://example.com/", "text": "hello"}
        })))
        .mount(&mock_server)
        .await;

    let index = es_index(&mock_server.uri());
    assert!(index.exists(PAGES, "abc").await.expect("exists"));
    assert!(!index.exists(PAGES, "missing").await.expect("exists"));
    index
        .index(PAGES, "abc", &json!({"url": "https://example.com/", "text": "hello"}))
        .await
        .expect("index");
    let source = index
        .get(PAGES, "abc", &["text"])
        .await
        .expect("get")
        .expect("found");
    assert_eq!(source["text"], "hello");
}

#[tokio::test]
async fn test_search_parses_hits_and_explanations() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/pages/_search"))
        .and(body_partial_json(json!({
            "query": {"match": {"text": "rust async"}},
            "explain": true,
            "size": 5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": {"hits": [{
                "_id": "abc",
                "_score": 2.5,
                "_source": {"title": "Async Rust", "url": "https://example.com/a"},
                "_explanation": {
                    "value": 2.5,
                    "description": "sum of:",
                    "details": [
                        {"value": 1.5, "description": "weight(text:rust in 3) [PerFieldSimilarity], result of:"},
                        {"value": 1.0, "description": "weight(text:async in 3) [PerFieldSimilarity], result of:"}
                    ]
                }
            }]}
        })))
        .mount(&mock_server)
        .await;

    let index = es_index(&mock_server.uri());
    let hits = index.search(PAGES, "rust async", 5).await.expect("search");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "abc");
    assert_eq!(hits[0].field("title"), Some("Async Rust"));
    assert_eq!(hits[0].explanation.get("rust"), Some(&1.5));
    assert_eq!(hits[0].explanation.get("async"), Some(&1.0));
}

#[tokio::test]
async fn test_server_errors_surface_status() {
    let mock_server = require_mock_server!();
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&mock_server)
        .await;

    let index = es_index(&mock_server.uri());
    let err = index.index(PAGES, "abc", &json!({})).await.unwrap_err();
    assert!(matches!(err, IndexError::Status { status: 503, .. }));
}

#[test]
fn test_debug_output_hides_password() {
    let index = es_index("http://localhost:9200");
    let rendered = format!("{index:?}");
    assert!(rendered.contains("elastic"));
    assert!(!rendered.contains("secret"));
}
