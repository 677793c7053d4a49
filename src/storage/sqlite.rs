//! SQLite storage implementation
//!
//! This module provides a SQLite-backed frontier. Several processes may open
//! the same database file: selection and the QUEUED transition happen inside
//! one IMMEDIATE transaction, so a record is never handed to two callers.

use crate::model::{Request, RequestBuilder, RequestMeta, Response};
use crate::state::UrlState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Backend, RequestSource, StateEntry, StateStore, StorageResult};
use crate::storage::{OrderingPolicy, UrlRecord};
use crate::url::{url_fingerprint, DownloaderInfo};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits for another process to release the database
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite frontier backend
pub struct SqliteBackend {
    conn: Connection,
    policy: OrderingPolicy,
    clear_content: bool,
    require_scheduling: bool,
}

impl SqliteBackend {
    /// Opens or creates a database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteBackend)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Configure SQLite for concurrent readers and one writer at a time
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            policy: OrderingPolicy::default(),
            clear_content: false,
            require_scheduling: false,
        }
    }

    pub fn with_policy(mut self, policy: OrderingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wipe every record when the backend starts
    pub fn with_clear_content(mut self, clear_content: bool) -> Self {
        self.clear_content = clear_content;
        self
    }

    /// Only hand out records a strategy has scheduled
    pub fn with_require_scheduling(mut self, require_scheduling: bool) -> Self {
        self.require_scheduling = require_scheduling;
        self
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    /// Writers take the database lock at BEGIN, never by upgrading a read
    fn write_transaction(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
    }

    /// Creates NOT_CRAWLED records for unseen fingerprints
    ///
    /// Returns the number of records actually created.
    pub fn create_records(&mut self, requests: &[Request], depth: u32) -> StorageResult<usize> {
        let tx = self.write_transaction()?;
        let created = insert_records(&tx, requests, depth)?;
        tx.commit()?;
        Ok(created)
    }

    /// Selects the next batch in policy order and marks it QUEUED
    ///
    /// `max_n == 0` selects every fetchable record.
    pub fn next_requests(&mut self, max_n: usize) -> StorageResult<Vec<Request>> {
        let sql = format!(
            "SELECT fingerprint, url, request, score FROM urls
             WHERE state = ?1{} ORDER BY {} LIMIT ?2",
            if self.require_scheduling {
                " AND scheduled = 1"
            } else {
                ""
            },
            self.policy.order_by()
        );
        let limit: i64 = if max_n == 0 { -1 } else { max_n as i64 };

        let tx = self.write_transaction()?;

        let candidates = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                params![UrlState::NotCrawled.to_db_string(), limit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                    ))
                },
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut requests = Vec::with_capacity(candidates.len());
        {
            let mut claim =
                tx.prepare("UPDATE urls SET state = ?1 WHERE fingerprint = ?2 AND state = ?3")?;
            for (fingerprint, url, stored, score) in candidates {
                let claimed = claim.execute(params![
                    UrlState::Queued.to_db_string(),
                    fingerprint,
                    UrlState::NotCrawled.to_db_string()
                ])?;
                if claimed != 1 {
                    continue;
                }

                let mut request = restore_request(&fingerprint, &url, &stored);
                request.meta.state = Some(UrlState::Queued);
                request.meta.score = score;
                requests.push(request);
            }
        }

        tx.commit()?;
        tracing::debug!(count = requests.len(), policy = %self.policy, "Selected next requests");
        Ok(requests)
    }

    /// Marks a page CRAWLED and records its links one level deeper
    pub fn record_crawled(&mut self, response: &Response, links: &[Request]) -> StorageResult<()> {
        let tx = self.write_transaction()?;
        let depth = ensure_record(&tx, &response.request)?;
        advance_state(
            &tx,
            &fingerprint_of(&response.request),
            UrlState::Crawled,
            Some(response.status_code),
            None,
        )?;
        insert_records(&tx, links, depth + 1)?;
        tx.commit()?;
        Ok(())
    }

    /// Records links one level below `request` without touching its state
    pub fn record_links(&mut self, request: &Request, links: &[Request]) -> StorageResult<()> {
        let tx = self.write_transaction()?;
        let depth = record_depth(&tx, &fingerprint_of(request))?.unwrap_or(0);
        insert_records(&tx, links, depth + 1)?;
        tx.commit()?;
        Ok(())
    }

    /// Marks a request ERROR with the downloader's error code
    pub fn record_error(&mut self, request: &Request, error: &str) -> StorageResult<()> {
        let tx = self.write_transaction()?;
        ensure_record(&tx, request)?;
        advance_state(&tx, &fingerprint_of(request), UrlState::Error, None, Some(error))?;
        tx.commit()?;
        Ok(())
    }

    /// Gets a record by fingerprint
    pub fn get_record(&self, fingerprint: &str) -> StorageResult<Option<UrlRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT fingerprint, url, depth, created_at, state, status_code, error, score,
                 scheduled FROM urls WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    Ok(UrlRecord {
                        fingerprint: row.get(0)?,
                        url: row.get(1)?,
                        depth: row.get(2)?,
                        created_at: row.get(3)?,
                        state: UrlState::from_db_string(&row.get::<_, String>(4)?)
                            .unwrap_or_default(),
                        status_code: row.get(5)?,
                        error: row.get(6)?,
                        score: row.get(7)?,
                        scheduled: row.get::<_, i64>(8)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Counts records per state
    pub fn count_by_state(&self) -> StorageResult<HashMap<UrlState, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM urls GROUP BY state")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            if let Some(state) = UrlState::from_db_string(&state) {
                counts.insert(state, count as u64);
            }
        }
        Ok(counts)
    }

    /// Gets total record count
    pub fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Deletes every record
    pub fn clear(&mut self) -> StorageResult<()> {
        let removed = self.conn.execute("DELETE FROM urls", [])?;
        tracing::info!(removed, "Cleared frontier content");
        Ok(())
    }
}

/// The request as stored: metadata complete, state kept in its own column
fn stored_request(request: &Request) -> Request {
    let mut stored = request.clone();
    stored.ensure_meta();
    stored.meta.state = None;
    stored
}

/// The fingerprint a record for `request` is stored under
///
/// Requests reported without metadata are keyed by their URL fingerprint,
/// the same key `insert_records` gives them.
fn fingerprint_of(request: &Request) -> Cow<'_, str> {
    if request.fingerprint().is_empty() {
        Cow::Owned(url_fingerprint(&request.url))
    } else {
        Cow::Borrowed(request.fingerprint())
    }
}

/// A GET request for `url` stored under a caller-chosen fingerprint
fn bare_request(fingerprint: &str, url: &str) -> Request {
    RequestBuilder::new(url)
        .meta(RequestMeta {
            fingerprint: fingerprint.to_string(),
            ..Default::default()
        })
        .build()
}

/// Rebuilds a request from its stored JSON, falling back to a bare request
/// for the URL when the JSON is unreadable
fn restore_request(fingerprint: &str, url: &str, stored: &str) -> Request {
    match serde_json::from_str::<Request>(stored) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(%fingerprint, error = %e, "Stored request is unreadable");
            bare_request(fingerprint, url)
        }
    }
}

fn insert_records(conn: &Connection, requests: &[Request], depth: u32) -> StorageResult<usize> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO urls (fingerprint, url, depth, created_at, state, score, request)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    let mut created = 0;
    for request in requests {
        let stored = stored_request(request);
        let inserted = stmt.execute(params![
            stored.fingerprint(),
            stored.url,
            depth,
            now,
            UrlState::NotCrawled.to_db_string(),
            stored.meta.score,
            serde_json::to_string(&stored)?,
        ])?;

        if inserted == 0 {
            tracing::debug!(fingerprint = %stored.fingerprint(), url = %stored.url, "Record exists");
        } else {
            created += 1;
        }
    }
    Ok(created)
}

fn record_depth(conn: &Connection, fingerprint: &str) -> StorageResult<Option<u32>> {
    Ok(conn
        .query_row(
            "SELECT depth FROM urls WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )
        .optional()?)
}

/// Returns the depth of the request's record, creating it at depth 0 if it is
/// unknown
fn ensure_record(conn: &Connection, request: &Request) -> StorageResult<u32> {
    if let Some(depth) = record_depth(conn, &fingerprint_of(request))? {
        return Ok(depth);
    }
    insert_records(conn, std::slice::from_ref(request), 0)?;
    Ok(0)
}

/// Moves a record forward in its life-cycle
///
/// Returns false when the record is unknown or already at or past `next`.
fn advance_state(
    conn: &Connection,
    fingerprint: &str,
    next: UrlState,
    status_code: Option<u16>,
    error: Option<&str>,
) -> StorageResult<bool> {
    let current: Option<String> = conn
        .query_row(
            "SELECT state FROM urls WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )
        .optional()?;

    let Some(current) = current.and_then(|s| UrlState::from_db_string(&s)) else {
        return Ok(false);
    };
    if !current.can_transition_to(next) {
        tracing::debug!(%fingerprint, from = %current, to = %next, "Ignoring stale transition");
        return Ok(false);
    }

    let changed = conn.execute(
        "UPDATE urls SET state = ?1, status_code = COALESCE(?2, status_code),
         error = COALESCE(?3, error) WHERE fingerprint = ?4 AND state = ?5",
        params![
            next.to_db_string(),
            status_code,
            error,
            fingerprint,
            current.to_db_string()
        ],
    )?;
    Ok(changed == 1)
}

impl RequestSource for SqliteBackend {
    async fn get_next_requests(
        &mut self,
        max_n: usize,
        _info: &DownloaderInfo,
    ) -> StorageResult<Vec<Request>> {
        self.next_requests(max_n)
    }
}

impl Backend for SqliteBackend {
    async fn start(&mut self) -> StorageResult<()> {
        if self.clear_content {
            self.clear()?;
        }
        tracing::info!(policy = %self.policy, require_scheduling = self.require_scheduling, "SQLite backend started");
        Ok(())
    }

    async fn stop(&mut self) -> StorageResult<()> {
        let counts = self.count_by_state()?;
        tracing::info!(?counts, "SQLite backend stopped");
        Ok(())
    }

    async fn add_seeds(&mut self, seeds: &[Request]) -> StorageResult<()> {
        let created = self.create_records(seeds, 0)?;
        tracing::debug!(seeds = seeds.len(), created, "Added seeds");
        Ok(())
    }

    async fn page_crawled(&mut self, response: &Response, links: &[Request]) -> StorageResult<()> {
        self.record_crawled(response, links)
    }

    async fn links_extracted(&mut self, request: &Request, links: &[Request]) -> StorageResult<()> {
        self.record_links(request, links)
    }

    async fn request_error(&mut self, request: &Request, error: &str) -> StorageResult<()> {
        self.record_error(request, error)
    }
}

impl StateStore for SqliteBackend {
    fn fetch_states(&mut self, fingerprints: &[String]) -> StorageResult<HashMap<String, UrlState>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT state FROM urls WHERE fingerprint = ?1")?;

        let mut states = HashMap::with_capacity(fingerprints.len());
        for fingerprint in fingerprints {
            let state: Option<String> = stmt
                .query_row(params![fingerprint], |row| row.get(0))
                .optional()?;
            if let Some(state) = state.and_then(|s| UrlState::from_db_string(&s)) {
                states.insert(fingerprint.clone(), state);
            }
        }
        Ok(states)
    }

    fn flush_states(&mut self, states: &HashMap<String, StateEntry>) -> StorageResult<()> {
        let tx = self.write_transaction()?;
        let mut created = 0;
        for (fingerprint, entry) in states {
            if record_depth(&tx, fingerprint)?.is_none() {
                let request = bare_request(fingerprint, &entry.url);
                created += insert_records(&tx, std::slice::from_ref(&request), 0)?;
            }
            advance_state(&tx, fingerprint, entry.state, None, None)?;
        }
        tx.commit()?;
        if created > 0 {
            tracing::debug!(created, "Created records for strategy states");
        }
        Ok(())
    }

    fn apply_score(
        &mut self,
        fingerprint: &str,
        url: &str,
        score: Option<f64>,
        schedule: bool,
    ) -> StorageResult<()> {
        let tx = self.write_transaction()?;
        let request = bare_request(fingerprint, url);
        insert_records(&tx, std::slice::from_ref(&request), 0)?;
        tx.execute(
            "UPDATE urls SET score = COALESCE(?1, score), scheduled = MAX(scheduled, ?2)
             WHERE fingerprint = ?3",
            params![score, schedule as i64, fingerprint],
        )?;
        tx.commit()?;
        Ok(())
    }
}
