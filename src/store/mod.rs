//! Target store: the persistence boundary for the target ledger
//!
//! The container job reads and writes targets only through the
//! [`TargetStore`] trait. Implementations are internally synchronized and
//! transactional; the engine never takes a lock around store calls.

pub mod schema;
mod sqlite;

pub use sqlite::SqliteTargetStore;

use std::collections::HashMap;

use crate::error::StoreResult;
use crate::request::TargetFilter;
use crate::target::{Target, TargetError, TargetState};

/// Persistence boundary for targets
pub trait TargetStore: Send + Sync {
    /// Persist a new target, assigning its id
    ///
    /// The id is assigned at most once; calling `store` for a target that
    /// already has one is a defect and returns an error.
    fn store(&self, target: &mut Target) -> StoreResult<i64>;

    /// Update state and error record for a persisted target
    ///
    /// Updating an already-terminal row is a no-op: terminal outcomes are
    /// written exactly once and never overwritten. The single exception is
    /// the retry reset FAILED -> READY, which reopens the row.
    fn update(
        &self,
        id: i64,
        state: TargetState,
        error: Option<&TargetError>,
    ) -> StoreResult<()>;

    /// Insert-or-update: `store` when the target has no id, `update`
    /// (plus the attempt counter) otherwise
    fn store_or_update(&self, target: &mut Target) -> StoreResult<()>;

    /// Fetch one target by id
    fn get(&self, id: i64) -> StoreResult<Option<Target>>;

    /// Fetch one target of a request by absolute path
    fn find_by_path(&self, request_id: &str, path: &str) -> StoreResult<Option<Target>>;

    /// All targets named directly by the request, in insertion order
    fn initial_targets(&self, request_id: &str) -> StoreResult<Vec<Target>>;

    /// Up to `limit` READY targets matching the type filter
    fn next_ready(
        &self,
        request_id: &str,
        filter: TargetFilter,
        limit: usize,
    ) -> StoreResult<Vec<Target>>;

    /// Mark every non-terminal target of the request CANCELLED
    ///
    /// Returns the number of rows changed.
    fn cancel_all(&self, request_id: &str) -> StoreResult<u64>;

    /// Target counts grouped by state, for status reporting
    fn count_by_state(&self, request_id: &str) -> StoreResult<HashMap<TargetState, u64>>;

    /// Stamp request metadata when a job starts; stores without a metadata
    /// table may leave this as the default no-op
    fn record_request_start(&self, _request_id: &str) -> StoreResult<()> {
        Ok(())
    }

    /// Stamp the finish time and final container state for a request
    fn record_request_end(&self, _request_id: &str, _final_state: &str) -> StoreResult<()> {
        Ok(())
    }
}
