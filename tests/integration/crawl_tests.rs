//! Integration tests for the embedded crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! fetch and report cycle against a frontier database on disk.

use ripple_frontier::config::Config;
use ripple_frontier::crawler::run_crawl;
use ripple_frontier::storage::SqliteBackend;
use ripple_frontier::{Request, UrlState};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration crawling from `seed` into `db_dir`
fn create_test_config(seed: String, db_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.crawler.seeds = vec![seed];
    config.crawler.scheduler_interval_ms = 10; // Very short for testing
    config.crawler.request_timeout_secs = 5;
    config.crawler.user_agent = "TestBot/1.0".to_string();
    config.storage.database_path = db_dir.path().join("frontier.db");
    config
}

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

fn record_state(db: &SqliteBackend, url: &str) -> Option<UrlState> {
    db.get_record(Request::new(url).fingerprint())
        .expect("Failed to read record")
        .map(|record| record.state)
}

#[tokio::test]
async fn test_full_crawl_single_host() {
    // Start a mock server
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // Index links to two pages; page1 links to a page that does not exist
    mount_html(
        &mock_server,
        "/",
        format!(
            r#"<html><body>
            <a href="{0}/page1">Page 1</a>
            <a href="{0}/page2">Page 2</a>
            <a href="mailto:someone@example.com">Mail</a>
            </body></html>"#,
            base_url
        ),
    )
    .await;
    mount_html(
        &mock_server,
        "/page1",
        r#"<html><body><a href="/missing">Gone</a></body></html>"#.to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("plain text, <a href=\"/never\">not parsed</a>")
                .insert_header("content-type", "text/plain"),
        )
        .mount(&mock_server)
        .await;

    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(format!("{}/", base_url), &db_dir);

    // Run the crawl
    let stats = run_crawl(&config, CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.failed, 1);

    // Verify results
    let db = SqliteBackend::new(&config.storage.database_path).expect("Failed to open DB");
    assert_eq!(
        record_state(&db, &format!("{}/", base_url)),
        Some(UrlState::Crawled)
    );
    assert_eq!(
        record_state(&db, &format!("{}/page1", base_url)),
        Some(UrlState::Crawled)
    );
    assert_eq!(
        record_state(&db, &format!("{}/page2", base_url)),
        Some(UrlState::Crawled)
    );

    let missing = db
        .get_record(Request::new(format!("{}/missing", base_url)).fingerprint())
        .expect("Failed to read record")
        .expect("Missing page should be recorded");
    assert_eq!(missing.state, UrlState::Error);
    assert_eq!(missing.error.as_deref(), Some("HTTP_404"));
    assert_eq!(missing.depth, 2);

    // Links from non-HTML bodies are never followed
    assert_eq!(record_state(&db, &format!("{}/never", base_url)), None);
    assert_eq!(db.count_records().expect("Failed to count"), 4);
}

#[tokio::test]
async fn test_crawl_stops_at_request_limit() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // A chain: / -> level1 -> level2
    mount_html(
        &mock_server,
        "/",
        format!(r#"<a href="{}/level1">Level 1</a>"#, base_url),
    )
    .await;
    mount_html(
        &mock_server,
        "/level1",
        format!(r#"<a href="{}/level2">Level 2</a>"#, base_url),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/level2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0) // Should never be called
        .mount(&mock_server)
        .await;

    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = create_test_config(format!("{}/", base_url), &db_dir);
    config.frontier.max_requests = 2;

    let stats = run_crawl(&config, CancellationToken::new())
        .await
        .expect("Crawl failed");
    assert_eq!(stats.fetched, 2);

    let db = SqliteBackend::new(&config.storage.database_path).expect("Failed to open DB");
    assert_eq!(
        record_state(&db, &format!("{}/level2", base_url)),
        Some(UrlState::NotCrawled)
    );
}

#[tokio::test]
async fn test_resumed_crawl_skips_crawled_pages() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1) // Second run finds the seed already crawled
        .mount(&mock_server)
        .await;

    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(format!("{}/", base_url), &db_dir);

    let first = run_crawl(&config, CancellationToken::new())
        .await
        .expect("First crawl failed");
    assert_eq!(first.fetched, 1);

    let second = run_crawl(&config, CancellationToken::new())
        .await
        .expect("Second crawl failed");
    assert_eq!(second.fetched, 0);
}

#[tokio::test]
async fn test_fresh_crawl_forgets_previous_records() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = create_test_config(format!("{}/", base_url), &db_dir);

    run_crawl(&config, CancellationToken::new())
        .await
        .expect("First crawl failed");

    config.storage.clear_content = true;
    let stats = run_crawl(&config, CancellationToken::new())
        .await
        .expect("Fresh crawl failed");
    assert_eq!(stats.fetched, 1);
}

#[tokio::test]
async fn test_cancelled_crawl_returns_cleanly() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    mount_html(&mock_server, "/", "<html></html>".to_string()).await;

    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(format!("{}/", base_url), &db_dir);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = run_crawl(&config, cancel).await.expect("Crawl failed");

    // At most the first tick's batch is fetched before cancellation is seen
    assert!(stats.fetched <= 1);
}
