//! Streaming chunk reader against the Oracle source.
//!
//! Reads are pinned to the chunk's snapshot SCN with `DBMS_FLASHBACK`, so
//! every chunk of a table observes the same consistent image regardless of
//! when it executes. Values are rendered to text at the cursor: the
//! projection already TO_CHARs the awkward datatypes server-side, binaries
//! are base64-coded here, and NULL stays distinguishable from the empty
//! string.

use crate::domain::cancel::CancelToken;
use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::oracle::connection_manager::SourceConnectionManager;
use crate::ports::source_port::{RowCursor, SourceReader};
use base64::{engine::general_purpose, Engine as _};
use log::warn;
use oracle::sql_type::OracleType;
use oracle::{Connection, ResultSet, Row};
use r2d2::Pool;
use std::sync::Arc;

const SQL_FLASHBACK_ENABLE: &str =
    "BEGIN DBMS_FLASHBACK.ENABLE_AT_SYSTEM_CHANGE_NUMBER(:1); END;";
const SQL_FLASHBACK_DISABLE: &str = "BEGIN DBMS_FLASHBACK.DISABLE; END;";

/// `SourceReader` over a shared Oracle pool.
pub struct OracleChunkReader {
    pool: Arc<Pool<SourceConnectionManager>>,
    prefetch_rows: u32,
}

impl OracleChunkReader {
    pub fn new(pool: Arc<Pool<SourceConnectionManager>>, prefetch_rows: u32) -> Self {
        Self {
            pool,
            prefetch_rows,
        }
    }

    fn stream_inner(
        &self,
        conn: &Connection,
        query: &str,
        cancel: &CancelToken,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<()>,
    ) -> Result<()> {
        let mut stmt = conn
            .statement(query)
            .prefetch_rows(self.prefetch_rows)
            .build()?;
        let rows = stmt.query(&[])?;

        let infos = rows.column_info();
        let columns: Vec<String> = infos.iter().map(|c| c.name().to_string()).collect();
        let types: Vec<OracleType> = infos.iter().map(|c| c.oracle_type().clone()).collect();

        let mut cursor = OracleRowCursor {
            rows,
            columns,
            types,
            cancel: cancel.clone(),
        };
        consume(&mut cursor)
    }
}

impl SourceReader for OracleChunkReader {
    fn stream(
        &self,
        query: &str,
        snapshot_scn: u64,
        cancel: &CancelToken,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<()>,
    ) -> Result<()> {
        if cancel.is_canceled() {
            return Err(ExportError::Canceled);
        }
        let conn = self.pool.get().map_err(ExportError::from)?;
        conn.execute(SQL_FLASHBACK_ENABLE, &[&snapshot_scn])?;

        let outcome = self.stream_inner(&conn, query, cancel, consume);

        // the session goes back to the pool, it must not stay pinned
        match conn.execute(SQL_FLASHBACK_DISABLE, &[]) {
            Ok(_) => outcome,
            Err(e) => {
                warn!("failed to disable flashback after chunk read: {}", e);
                outcome.and(Err(ExportError::from(e)))
            }
        }
    }
}

struct OracleRowCursor<'a> {
    rows: ResultSet<'a, Row>,
    columns: Vec<String>,
    types: Vec<OracleType>,
    cancel: CancelToken,
}

impl RowCursor for OracleRowCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    /// An atomic load per row keeps cancellation responsive at fetch
    /// granularity; the blocking prefetch round-trip is at most one batch
    /// behind the signal.
    fn next_row(&mut self) -> Option<Result<Vec<Option<String>>>> {
        if self.cancel.is_canceled() {
            return Some(Err(ExportError::Canceled));
        }
        let row = self.rows.next()?;
        Some(
            row.map_err(ExportError::from)
                .and_then(|r| render_row(&r, &self.types)),
        )
    }
}

fn render_row(row: &Row, types: &[OracleType]) -> Result<Vec<Option<String>>> {
    let mut fields = Vec::with_capacity(types.len());
    for (idx, otype) in types.iter().enumerate() {
        fields.push(render_value(row, idx, otype)?);
    }
    Ok(fields)
}

/// Binaries travel as base64; everything else already has a stable textual
/// form thanks to the server-side projection.
fn render_value(row: &Row, idx: usize, otype: &OracleType) -> Result<Option<String>> {
    match otype {
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => {
            let value: Option<Vec<u8>> = row.get(idx)?;
            Ok(value.map(|bytes| general_purpose::STANDARD.encode(bytes)))
        }
        _ => {
            let value: Option<String> = row.get(idx)?;
            Ok(value)
        }
    }
}
