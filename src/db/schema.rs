//! Database schema definitions and creation
//!
//! This module defines the SQLite schema for the job queue and asset ledger
//! and provides functions to create and configure the database.

use crate::error::DbResult;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the job queue table
///
/// AUTOINCREMENT keeps ids strictly increasing across deletes so the
/// `id ASC` tiebreak stays a discovery-order tiebreak.
const CREATE_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL DEFAULT 'QUEUED'
        CHECK (state IN ('QUEUED', 'FETCHING', 'COMPLETED')),
    cost INTEGER NOT NULL,
    code INTEGER,                 -- HTTP status, set on completion
    batch_ref TEXT                -- packed archive holding the body
)
"#;

/// SQL to create the asset ledger table
const CREATE_ASSET_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS asset (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE
)
"#;

/// SQL to create archive run metadata table
const CREATE_ARCHIVE_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS archive_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// Partial index serving "highest cost, oldest id" among QUEUED rows
const CREATE_CLAIM_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_queue_queued_cost_id \
     ON queue (cost DESC, id ASC) WHERE state = 'QUEUED'";

/// SQLite pragmas for a long-running writer that must survive crashes
const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;      -- 64MB cache
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = OFF;
"#;

/// Create and configure the database
pub fn create_database(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(PRAGMAS)?;

    conn.execute(CREATE_QUEUE_TABLE, [])?;
    conn.execute(CREATE_ASSET_TABLE, [])?;
    conn.execute(CREATE_ARCHIVE_INFO_TABLE, [])?;
    conn.execute(CREATE_CLAIM_INDEX, [])?;

    Ok(())
}

/// Store archive metadata
pub fn set_archive_info(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO archive_info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get archive metadata
pub fn get_archive_info(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM archive_info WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Metadata keys used by the archiver
pub mod keys {
    /// Base URL the crawl fetches from
    pub const BASE_URL: &str = "base_url";

    /// Timestamp when the last run started (RFC 3339)
    pub const START_TIME: &str = "start_time";

    /// Timestamp when the last run stopped (RFC 3339)
    pub const END_TIME: &str = "end_time";

    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Archiver version
    pub const ARCHIVER_VERSION: &str = "archiver_version";

    /// Run status: "running", "completed", "interrupted", "failed"
    pub const STATUS: &str = "status";
}
