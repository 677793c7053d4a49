//! Integration tests for several processes sharing one database
//!
//! Each thread owns its own connection, as separate downloader processes
//! would. A record must never be handed to more than one of them.

use ripple_frontier::storage::{OrderingPolicy, SqliteBackend};
use ripple_frontier::{Request, UrlState};
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

const BACKENDS: usize = 4;
const RECORDS: usize = 200;

fn seed(path: &Path) {
    let mut backend = SqliteBackend::new(path).expect("Failed to open DB");
    let requests: Vec<Request> = (0..RECORDS)
        .map(|i| Request::new(format!("http://h{}.com/{}", i % 7, i)))
        .collect();
    assert_eq!(
        backend.create_records(&requests, 0).expect("Failed to seed"),
        RECORDS
    );
}

#[test]
fn test_concurrent_backends_never_share_a_record() {
    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let path = db_dir.path().join("frontier.db");
    seed(&path);

    // Open every connection before starting so schema setup is not contended
    let backends: Vec<SqliteBackend> = (0..BACKENDS)
        .map(|_| {
            SqliteBackend::new(&path)
                .expect("Failed to open DB")
                .with_policy(OrderingPolicy::Fifo)
        })
        .collect();

    let handles: Vec<_> = backends
        .into_iter()
        .map(|mut backend| {
            std::thread::spawn(move || {
                let mut claimed = Vec::new();
                loop {
                    let batch = backend.next_requests(7).expect("Failed to claim batch");
                    if batch.is_empty() {
                        break;
                    }
                    claimed.extend(batch.into_iter().map(|r| r.fingerprint().to_string()));
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for fingerprint in handle.join().expect("Worker thread panicked") {
            total += 1;
            assert!(seen.insert(fingerprint), "Record handed out twice");
        }
    }
    assert_eq!(total, RECORDS);

    let db = SqliteBackend::new(&path).expect("Failed to open DB");
    let counts = db.count_by_state().expect("Failed to count");
    assert_eq!(counts.get(&UrlState::Queued).copied(), Some(RECORDS as u64));
    assert_eq!(counts.get(&UrlState::NotCrawled).copied().unwrap_or(0), 0);
}

#[test]
fn test_concurrent_reports_keep_every_link() {
    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let path = db_dir.path().join("frontier.db");

    let backends: Vec<SqliteBackend> = (0..BACKENDS)
        .map(|_| SqliteBackend::new(&path).expect("Failed to open DB"))
        .collect();

    // Every thread reports the same links plus some of its own
    let handles: Vec<_> = backends
        .into_iter()
        .enumerate()
        .map(|(n, mut backend)| {
            std::thread::spawn(move || {
                let page = Request::new(format!("http://page{}.com/", n));
                let mut links: Vec<Request> = (0..10)
                    .map(|i| Request::new(format!("http://shared.com/{}", i)))
                    .collect();
                links.extend((0..10).map(|i| Request::new(format!("http://own{}.com/{}", n, i))));
                backend
                    .record_links(&page, &links)
                    .expect("Failed to record links");
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Worker thread panicked");
    }

    let db = SqliteBackend::new(&path).expect("Failed to open DB");
    assert_eq!(
        db.count_records().expect("Failed to count"),
        (10 + 10 * BACKENDS) as u64
    );
}
