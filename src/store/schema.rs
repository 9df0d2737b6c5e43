//! Ledger schema definitions and creation
//!
//! The ledger is a SQLite database holding one row per target plus a
//! key/value table of per-request metadata. Unlike a bulk-load scan
//! database, the ledger is queried concurrently by status reporting while
//! the job runs, so indexes are created up front and WAL mode stays on.

use rusqlite::Connection;

use crate::error::StoreResult;

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the targets table
const CREATE_TARGETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS targets (
    id INTEGER PRIMARY KEY,
    request_id TEXT NOT NULL,
    request_label TEXT NOT NULL,
    pid INTEGER NOT NULL,          -- 0=root, 1=initial, 2=discovered
    path TEXT NOT NULL,
    file_type INTEGER,             -- 0=file, 1=dir, 2=link, 3=special
    state INTEGER NOT NULL,        -- see TargetState
    attempts INTEGER NOT NULL DEFAULT 0,
    error_kind TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE (request_id, path)
)
"#;

/// SQL to create the request metadata table
const CREATE_REQUEST_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS request_info (
    request_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,

    PRIMARY KEY (request_id, key)
)
"#;

/// SQL to create indexes for the queries the engine and status reporting run
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_targets_request ON targets(request_id)",
    "CREATE INDEX IF NOT EXISTS idx_targets_state ON targets(request_id, state)",
];

/// SQLite pragmas: WAL so status queries read while the job writes
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;
"#;

/// Create and configure the ledger schema
pub fn create_database(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(WRITE_PRAGMAS)?;

    conn.execute(CREATE_TARGETS_TABLE, [])?;
    conn.execute(CREATE_REQUEST_INFO_TABLE, [])?;

    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }

    Ok(())
}

/// Store a request metadata value
pub fn set_request_info(
    conn: &Connection,
    request_id: &str,
    key: &str,
    value: &str,
) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO request_info (request_id, key, value) VALUES (?1, ?2, ?3)",
        [request_id, key, value],
    )?;
    Ok(())
}

/// Get a request metadata value
pub fn get_request_info(
    conn: &Connection,
    request_id: &str,
    key: &str,
) -> StoreResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM request_info WHERE request_id = ?1 AND key = ?2",
        [request_id, key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys written by the engine
pub mod keys {
    /// Engine version that ran the request
    pub const ENGINE_VERSION: &str = "engine_version";

    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Timestamp when the job started (ISO 8601)
    pub const STARTED_AT: &str = "started_at";

    /// Timestamp when the job finished (ISO 8601)
    pub const FINISHED_AT: &str = "finished_at";

    /// Final container state: "completed", "cancelled", "failed"
    pub const FINAL_STATE: &str = "final_state";
}
