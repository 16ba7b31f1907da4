//! # Metadata Store Gateway Port
//!
//! CRUD over the two checkpoint tables plus the two compound operations
//! that must be atomic with respect to concurrent planners and executors
//! on the same key.
//!
//! Counters are authoritative in the store: the terminal-transition
//! operations recount chunk rows inside their own transaction instead of
//! trusting caller-side tallies.

use crate::domain::entities::{ChunkProgress, RunKey, TableKey, TableProgress, TaskStatus};
use crate::domain::errors::Result;

/// Gateway over `table_progress` and `chunk_progress`.
///
/// Implementations reject inserts whose schema or table identifiers are not
/// already canonical upper case.
pub trait MetaGateway: Send + Sync {
    // --- table_progress ---

    fn table_progress(&self, key: &TableKey) -> Result<Option<TableProgress>>;

    /// Inserts a fresh row; errors if the key already exists.
    fn create_table_progress(&self, row: &TableProgress) -> Result<()>;

    fn update_table_status(&self, key: &TableKey, status: TaskStatus) -> Result<()>;

    /// Table names under the run key currently in `status`.
    fn tables_with_status(&self, run: &RunKey, status: TaskStatus) -> Result<Vec<String>>;

    fn count_tables_with_status(&self, run: &RunKey, status: TaskStatus) -> Result<u64>;

    /// Deletes WAITING rows for exactly the named tables.
    fn delete_waiting_tables(&self, run: &RunKey, tables: &[String]) -> Result<()>;

    /// Deletes SUCCESS rows for tables *not* in the configured allow-list,
    /// returning the names removed. The allow-list is mandatory so a stale
    /// history can never wipe rows for tables still being migrated.
    fn delete_success_not_configured(
        &self,
        run: &RunKey,
        configured: &[String],
    ) -> Result<Vec<String>>;

    // --- chunk_progress ---

    /// All chunk rows for a table whose status is one of `statuses`.
    fn chunks_with_status(
        &self,
        key: &TableKey,
        statuses: &[TaskStatus],
    ) -> Result<Vec<ChunkProgress>>;

    fn count_chunks(&self, key: &TableKey) -> Result<u64>;

    fn count_chunks_with_status(&self, key: &TableKey, status: TaskStatus) -> Result<u64>;

    /// Transitions one chunk row, identified by its predicate. `info` and
    /// `error` are recorded only on failure transitions.
    fn update_chunk_status(
        &self,
        key: &TableKey,
        predicate: &str,
        status: TaskStatus,
        info: Option<&str>,
        error: Option<&str>,
    ) -> Result<()>;

    /// Deletes every chunk row under the run key (the `resume_allowed =
    /// false` reset path).
    fn delete_chunks_for_run(&self, run: &RunKey) -> Result<()>;

    // --- compound, atomic ---

    /// Planner commit: replaces the table's chunk rows (batched by
    /// `insert_batch`) and rewrites the parent row (WAITING, chunks_total,
    /// snapshot) in one logical transaction.
    fn create_chunks_with_table(
        &self,
        chunks: &[ChunkProgress],
        table: &TableProgress,
        insert_batch: usize,
    ) -> Result<()>;

    /// Executor commit on clean completion: deletes the table's SUCCESS
    /// chunk rows and flips the parent to SUCCESS with `chunks_ok` set to
    /// the count just deleted, atomically. Returns that count.
    fn finish_table_success(&self, key: &TableKey) -> Result<u64>;

    /// Executor commit when failures remain: recounts terminal chunks and
    /// flips the parent to FAILED with current counters, keeping every
    /// chunk row as the resume handle. Returns (chunks_ok, chunks_failed).
    fn finish_table_failed(&self, key: &TableKey) -> Result<(u64, u64)>;
}
