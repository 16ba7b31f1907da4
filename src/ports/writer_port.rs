//! # Record Writer Port
//!
//! Contract for the component that turns a live cursor into one on-disk
//! artifact. The writer owns file creation, field quoting, character-set
//! handling, and flushing; the executor only hands it the cursor and the
//! resolved column names.

use crate::domain::cancel::CancelToken;
use crate::domain::errors::Result;
use crate::ports::source_port::RowCursor;

/// Everything a writer needs to know about one chunk.
#[derive(Debug)]
pub struct WriteRequest<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    /// Source database character set identifier.
    pub charset: &'a str,
    /// The query that produced the cursor, for diagnostics.
    pub query: &'a str,
    pub output_path: &'a str,
    /// Resolved column names, in cursor order.
    pub columns: &'a [String],
}

/// Drains a cursor into the artifact at `req.output_path`.
pub trait RecordWriter: Send + Sync {
    /// Returns the number of data rows written. Any error means the chunk
    /// failed; the engine records it and moves on. `cancel` is consulted
    /// per row so a canceled run stops writing mid-chunk and leaves no
    /// partial artifact behind.
    fn write_chunk(
        &self,
        req: &WriteRequest<'_>,
        cursor: &mut dyn RowCursor,
        cancel: &CancelToken,
    ) -> Result<u64>;
}
