//! ROWID range splitter built on `DBMS_PARALLEL_EXECUTE`.
//!
//! The package materializes chunk boundaries into
//! `user_parallel_execute_chunks` under a named task; that task is
//! source-side transient state and must be dropped on every exit path, so
//! a guard owns its lifetime.

use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::oracle::connection_manager::SourceConnectionManager;
use crate::ports::source_port::ChunkSplitter;
use log::{debug, warn};
use oracle::Connection;
use r2d2::Pool;
use std::sync::Arc;

const SQL_CREATE_TASK: &str = "BEGIN DBMS_PARALLEL_EXECUTE.CREATE_TASK(:1); END;";
const SQL_DROP_TASK: &str = "BEGIN DBMS_PARALLEL_EXECUTE.DROP_TASK(:1); END;";
const SQL_CHUNK_BY_ROWID: &str =
    "BEGIN DBMS_PARALLEL_EXECUTE.CREATE_CHUNKS_BY_ROWID(:1, :2, :3, TRUE, :4); END;";
const SQL_FETCH_CHUNKS: &str = "
    SELECT START_ROWID, END_ROWID
    FROM USER_PARALLEL_EXECUTE_CHUNKS
    WHERE TASK_NAME = :1
    ORDER BY CHUNK_ID
";

/// Drops the chunking task when it goes out of scope, errors included.
struct ChunkTaskGuard<'a> {
    conn: &'a Connection,
    task: &'a str,
}

impl Drop for ChunkTaskGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.execute(SQL_DROP_TASK, &[&self.task]) {
            warn!("failed to drop chunk task {}: {}", self.task, e);
        }
    }
}

/// `ChunkSplitter` over a shared Oracle pool.
pub struct OracleRowidSplitter {
    pool: Arc<Pool<SourceConnectionManager>>,
}

impl OracleRowidSplitter {
    pub fn new(pool: Arc<Pool<SourceConnectionManager>>) -> Self {
        Self { pool }
    }
}

impl ChunkSplitter for OracleRowidSplitter {
    fn rowid_chunks(
        &self,
        schema: &str,
        table: &str,
        chunk_rows: u64,
        worker_id: usize,
    ) -> Result<Vec<String>> {
        let conn = self.pool.get().map_err(ExportError::from)?;
        let schema = schema.to_uppercase();
        let table = table.to_uppercase();
        let task = format!("{}_{}_TASK{}", schema, table, worker_id);

        // a leftover task from a crashed run would make CREATE_TASK fail
        let _ = conn.execute(SQL_DROP_TASK, &[&task]);
        conn.execute(SQL_CREATE_TASK, &[&task])?;
        let _guard = ChunkTaskGuard {
            conn: &*conn,
            task: &task,
        };

        conn.execute(
            SQL_CHUNK_BY_ROWID,
            &[&task, &schema, &table, &(chunk_rows as i64)],
        )?;

        let rows = conn.query(SQL_FETCH_CHUNKS, &[&task])?;
        let mut predicates = Vec::new();
        for row in rows {
            let row = row?;
            let start: String = row.get(0)?;
            let end: String = row.get(1)?;
            predicates.push(format!("ROWID BETWEEN '{}' AND '{}'", start, end));
        }
        debug!(
            "table {}.{} split into {} rowid ranges (target {} rows each)",
            schema,
            table,
            predicates.len(),
            chunk_rows
        );
        Ok(predicates)
    }
}
