//! Database schema definitions
//!
//! This module contains the SQL schema for the Ripple-Frontier URL store.

/// SQL schema for the database
///
/// `seq` records creation order and breaks ordering ties. AUTOINCREMENT
/// keeps it stable across `VACUUM` and never hands out a value twice.
pub const SCHEMA_SQL: &str = r#"
-- One record per URL fingerprint
CREATE TABLE IF NOT EXISTS urls (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    state TEXT NOT NULL,
    status_code INTEGER,
    error TEXT,
    score REAL,
    scheduled INTEGER NOT NULL DEFAULT 0,
    request TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_urls_state ON urls(state);
CREATE INDEX IF NOT EXISTS idx_urls_depth ON urls(depth);
CREATE INDEX IF NOT EXISTS idx_urls_score ON urls(score);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
