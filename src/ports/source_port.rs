//! # Source Store Ports
//!
//! The engine touches the source database through three narrow contracts:
//!
//! - `SourceProbe`: dictionary reads used by the planner (version, snapshot,
//!   catalog, statistics).
//! - `ChunkSplitter`: asks the source to partition a table into physical
//!   row-range predicates.
//! - `SourceReader`: opens a streaming cursor for one chunk's query.
//!
//! Everything else in the core is source-agnostic.

use crate::domain::cancel::CancelToken;
use crate::domain::entities::ColumnInfo;
use crate::domain::errors::Result;

/// Dictionary-level reads against the source store.
pub trait SourceProbe: Send + Sync {
    /// Source engine version string, dotted-numeric (e.g. "19.3.0.0.0").
    fn version(&self) -> Result<String>;

    /// Current snapshot identifier, used to pin consistent reads across all
    /// chunks of a table.
    fn current_scn(&self) -> Result<u64>;

    /// Source database character set identifier, passed through to writers.
    fn character_set(&self) -> Result<String>;

    /// All table names in a schema.
    fn schema_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Names of partitioned tables in a schema (advisory metadata).
    fn partitioned_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Row count according to optimizer statistics; 0 when statistics are
    /// missing or the table is empty.
    fn stats_row_count(&self, schema: &str, table: &str) -> Result<u64>;

    /// Ordered column catalog for one table. `collation_capable` signals
    /// whether the dictionary exposes per-column collation metadata.
    fn table_columns(
        &self,
        schema: &str,
        table: &str,
        collation_capable: bool,
    ) -> Result<Vec<ColumnInfo>>;
}

/// Produces row-range predicates that disjointly and exhaustively cover a
/// table.
///
/// An empty result means "no ranges produced"; the planner falls back to a
/// single whole-table chunk. Implementations must release any source-side
/// chunking state before returning, on every exit path.
pub trait ChunkSplitter: Send + Sync {
    fn rowid_chunks(
        &self,
        schema: &str,
        table: &str,
        chunk_rows: u64,
        worker_id: usize,
    ) -> Result<Vec<String>>;
}

/// A live, streaming result cursor for one chunk query.
///
/// Rows are rendered as text fields: `None` is SQL NULL, everything else is
/// the textual form the projection produced (binaries arrive base64-coded).
pub trait RowCursor {
    /// Resolved column names, in projection order.
    fn columns(&self) -> &[String];

    /// Next row, or `None` at end of stream.
    fn next_row(&mut self) -> Option<Result<Vec<Option<String>>>>;
}

/// Opens chunk cursors against the source.
///
/// The cursor is lent to `consume` rather than returned, so statement and
/// connection lifetimes stay inside the adapter and are released on every
/// exit path. Implementations consult `cancel` while fetching (per row at
/// minimum) so a canceled run aborts an in-flight read instead of draining
/// the chunk.
pub trait SourceReader: Send + Sync {
    fn stream(
        &self,
        query: &str,
        snapshot_scn: u64,
        cancel: &CancelToken,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<()>,
    ) -> Result<()>;
}
