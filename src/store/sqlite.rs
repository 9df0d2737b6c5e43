//! SQLite-backed target store
//!
//! One connection guarded by a mutex; every call is a single short
//! transaction. Status reporting reads the same file through its own
//! connection (WAL mode), so no read traffic flows through this lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::namespace::{FileType, FsAttributes};
use crate::request::TargetFilter;
use crate::store::schema::{self, keys};
use crate::store::TargetStore;
use crate::target::{Pid, Target, TargetError, TargetState};

/// SQLite implementation of the target ledger
pub struct SqliteTargetStore {
    conn: Mutex<Connection>,
}

impl SqliteTargetStore {
    /// Open (or create) a ledger at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        schema::create_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory ledger (tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record request metadata (engine version, start/finish timestamps)
    pub fn set_request_info(&self, request_id: &str, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock();
        schema::set_request_info(&conn, request_id, key, value)
    }

    /// Read request metadata
    pub fn get_request_info(&self, request_id: &str, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock();
        schema::get_request_info(&conn, request_id, key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned ledger lock means a panic mid-statement; propagating the
        // panic is the only sound option left.
        self.conn.lock().expect("ledger lock poisoned")
    }

    fn row_to_target(row: &Row<'_>) -> rusqlite::Result<Target> {
        let file_type: Option<i64> = row.get("file_type")?;
        let error_kind: Option<String> = row.get("error_kind")?;
        let error_message: Option<String> = row.get("error_message")?;

        let error = match (error_kind, error_message) {
            (Some(kind), Some(message)) => Some(TargetError { kind, message }),
            _ => None,
        };

        Ok(Target {
            id: Some(row.get("id")?),
            request_id: row.get("request_id")?,
            request_label: row.get("request_label")?,
            pid: Pid::from_u8(row.get::<_, i64>("pid")? as u8),
            path: row.get("path")?,
            attrs: FsAttributes {
                file_type: file_type.map(|t| FileType::from_u8(t as u8)),
                ..Default::default()
            },
            state: TargetState::from_u8(row.get::<_, i64>("state")? as u8),
            error,
            attempts: row.get::<_, i64>("attempts")? as u32,
        })
    }

    fn filter_clause(filter: TargetFilter) -> &'static str {
        match filter {
            TargetFilter::File => "AND file_type IN (0, 2)",
            TargetFilter::Dir => "AND file_type = 1",
            TargetFilter::Both => "",
        }
    }
}

const SELECT_COLUMNS: &str = "id, request_id, request_label, pid, path, file_type, state, \
                              attempts, error_kind, error_message";

impl TargetStore for SqliteTargetStore {
    fn store(&self, target: &mut Target) -> StoreResult<i64> {
        if let Some(id) = target.id {
            // Ids are assigned exactly once.
            return Err(StoreError::AlreadyStored(id));
        }

        let conn = self.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO targets (request_id, request_label, pid, path, file_type, state, \
                                  attempts, error_kind, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                target.request_id,
                target.request_label,
                target.pid.as_db_int(),
                target.path,
                target.attrs.file_type.map(|t| t.as_db_int()),
                target.state.as_db_int(),
                target.attempts as i64,
                target.error.as_ref().map(|e| e.kind.as_str()),
                target.error.as_ref().map(|e| e.message.as_str()),
                now,
            ],
        )?;

        let id = conn.last_insert_rowid();
        target.id = Some(id);
        Ok(id)
    }

    fn update(&self, id: i64, state: TargetState, error: Option<&TargetError>) -> StoreResult<()> {
        let conn = self.lock();

        let current: Option<i64> = conn
            .query_row("SELECT state FROM targets WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        let current = match current {
            Some(s) => TargetState::from_u8(s as u8),
            None => return Err(StoreError::NotFound(id)),
        };

        // Terminal rows are written once. Two exceptions: a repeat of the
        // same state is the idempotent no-op callers rely on, and the retry
        // reset FAILED -> READY reopens the row. Anything else is dropped.
        if current.is_terminal() {
            let retry_reset = current == TargetState::Failed && state == TargetState::Ready;
            if !retry_reset {
                if current != state {
                    warn!(
                        id = id,
                        current = ?current,
                        requested = ?state,
                        "Ignoring update of terminal target"
                    );
                }
                return Ok(());
            }
        }

        conn.execute(
            "UPDATE targets SET state = ?2, error_kind = ?3, error_message = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                state.as_db_int(),
                error.map(|e| e.kind.as_str()),
                error.map(|e| e.message.as_str()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn store_or_update(&self, target: &mut Target) -> StoreResult<()> {
        match target.id {
            None => {
                self.store(target)?;
                Ok(())
            }
            Some(id) => {
                {
                    let conn = self.lock();
                    conn.execute(
                        "UPDATE targets SET attempts = ?2, file_type = ?3 WHERE id = ?1",
                        params![
                            id,
                            target.attempts as i64,
                            target.attrs.file_type.map(|t| t.as_db_int()),
                        ],
                    )?;
                }
                self.update(id, target.state, target.error.as_ref())
            }
        }
    }

    fn get(&self, id: i64) -> StoreResult<Option<Target>> {
        let conn = self.lock();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM targets WHERE id = ?1");
        Ok(conn
            .query_row(&sql, [id], Self::row_to_target)
            .optional()?)
    }

    fn find_by_path(&self, request_id: &str, path: &str) -> StoreResult<Option<Target>> {
        let conn = self.lock();
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM targets WHERE request_id = ?1 AND path = ?2");
        Ok(conn
            .query_row(&sql, [request_id, path], Self::row_to_target)
            .optional()?)
    }

    fn initial_targets(&self, request_id: &str) -> StoreResult<Vec<Target>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM targets \
             WHERE request_id = ?1 AND pid = {} ORDER BY id",
            Pid::Initial.as_db_int()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([request_id], Self::row_to_target)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn next_ready(
        &self,
        request_id: &str,
        filter: TargetFilter,
        limit: usize,
    ) -> StoreResult<Vec<Target>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM targets \
             WHERE request_id = ?1 AND state = {} {} ORDER BY id LIMIT ?2",
            TargetState::Ready.as_db_int(),
            Self::filter_clause(filter),
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![request_id, limit as i64], Self::row_to_target)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn cancel_all(&self, request_id: &str) -> StoreResult<u64> {
        let conn = self.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE targets SET state = {}, updated_at = ?2 \
                 WHERE request_id = ?1 AND state IN ({}, {}, {})",
                TargetState::Cancelled.as_db_int(),
                TargetState::Created.as_db_int(),
                TargetState::Ready.as_db_int(),
                TargetState::Running.as_db_int(),
            ),
            params![request_id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed as u64)
    }

    fn count_by_state(&self, request_id: &str) -> StoreResult<HashMap<TargetState, u64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT state, COUNT(*) FROM targets WHERE request_id = ?1 GROUP BY state",
        )?;
        let rows = stmt.query_map([request_id], |row| {
            Ok((
                TargetState::from_u8(row.get::<_, i64>(0)? as u8),
                row.get::<_, i64>(1)? as u64,
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
    }

    fn record_request_start(&self, request_id: &str) -> StoreResult<()> {
        let conn = self.lock();
        schema::set_request_info(&conn, request_id, keys::ENGINE_VERSION, env!("CARGO_PKG_VERSION"))?;
        schema::set_request_info(
            &conn,
            request_id,
            keys::SCHEMA_VERSION,
            &schema::SCHEMA_VERSION.to_string(),
        )?;
        schema::set_request_info(&conn, request_id, keys::STARTED_AT, &Utc::now().to_rfc3339())
    }

    fn record_request_end(&self, request_id: &str, final_state: &str) -> StoreResult<()> {
        let conn = self.lock();
        schema::set_request_info(&conn, request_id, keys::FINISHED_AT, &Utc::now().to_rfc3339())?;
        schema::set_request_info(&conn, request_id, keys::FINAL_STATE, final_state)
    }
}
