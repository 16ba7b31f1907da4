//! SQLite-backed implementation of the metadata store gateway.
//!
//! The checkpoint tables live in a single SQLite file next to the run (or
//! in memory for tests). A `Mutex` around the connection serializes the
//! compound operations; both of them run inside explicit transactions so a
//! crash can never leave the pair half-applied.

use crate::domain::entities::{ChunkProgress, RunKey, TableKey, TableProgress, TaskStatus};
use crate::domain::errors::{ExportError, Result};
use crate::ports::meta_port::MetaGateway;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Mutex;

const BOOTSTRAP_DDL: &str = "
CREATE TABLE IF NOT EXISTS table_progress (
    source_db      TEXT NOT NULL,
    target_db      TEXT NOT NULL,
    schema_name    TEXT NOT NULL,
    table_name     TEXT NOT NULL,
    task_mode      TEXT NOT NULL,
    task_status    TEXT NOT NULL,
    snapshot_scn   INTEGER NOT NULL DEFAULT 0,
    chunks_total   INTEGER NOT NULL DEFAULT 0,
    chunks_ok      INTEGER NOT NULL DEFAULT 0,
    chunks_failed  INTEGER NOT NULL DEFAULT 0,
    is_partitioned INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source_db, target_db, schema_name, table_name, task_mode)
);
CREATE TABLE IF NOT EXISTS chunk_progress (
    source_db      TEXT NOT NULL,
    target_db      TEXT NOT NULL,
    schema_name    TEXT NOT NULL,
    table_name     TEXT NOT NULL,
    task_mode      TEXT NOT NULL,
    predicate      TEXT NOT NULL,
    task_status    TEXT NOT NULL,
    snapshot_scn   INTEGER NOT NULL DEFAULT 0,
    projection     TEXT NOT NULL,
    target_schema  TEXT NOT NULL,
    target_table   TEXT NOT NULL,
    output_path    TEXT NOT NULL,
    info           TEXT,
    error          TEXT,
    PRIMARY KEY (source_db, target_db, schema_name, table_name, task_mode, predicate)
);
";

const TABLE_KEY_WHERE: &str =
    "source_db = ?1 AND target_db = ?2 AND schema_name = ?3 AND table_name = ?4 AND task_mode = ?5";
const RUN_KEY_WHERE: &str =
    "source_db = ?1 AND target_db = ?2 AND schema_name = ?3 AND task_mode = ?4";

/// Gateway over the two checkpoint tables, backed by SQLite.
pub struct SqliteMetaStore {
    conn: Mutex<Connection>,
}

impl SqliteMetaStore {
    /// Opens (creating if needed) the metadata database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(BOOTSTRAP_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ExportError::Metadata("metadata connection mutex poisoned".to_string()))
    }

    /// Invariant 5: identifiers in keys are canonical upper case. Mixed
    /// case on insert is a caller bug and is rejected outright.
    fn check_casing(key: &TableKey) -> Result<()> {
        if key.run.schema != key.run.schema.to_uppercase()
            || key.table != key.table.to_uppercase()
        {
            return Err(ExportError::Metadata(format!(
                "refusing to insert non-canonical identifier casing: {}.{}",
                key.run.schema, key.table
            )));
        }
        Ok(())
    }

    fn table_from_row(key: TableKey, row: &rusqlite::Row<'_>) -> rusqlite::Result<TableProgress> {
        Ok(TableProgress {
            key,
            status: row
                .get::<_, String>(0)?
                .parse()
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            snapshot_scn: row.get::<_, i64>(1)? as u64,
            chunks_total: row.get::<_, i64>(2)? as u64,
            chunks_ok: row.get::<_, i64>(3)? as u64,
            chunks_failed: row.get::<_, i64>(4)? as u64,
            is_partitioned: row.get::<_, i64>(5)? != 0,
        })
    }

    fn upsert_table_tx(tx: &Transaction<'_>, row: &TableProgress) -> Result<()> {
        tx.execute(
            "INSERT INTO table_progress (source_db, target_db, schema_name, table_name, task_mode,
                                         task_status, snapshot_scn, chunks_total, chunks_ok,
                                         chunks_failed, is_partitioned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9)
             ON CONFLICT (source_db, target_db, schema_name, table_name, task_mode)
             DO UPDATE SET task_status = excluded.task_status,
                           snapshot_scn = excluded.snapshot_scn,
                           chunks_total = excluded.chunks_total,
                           chunks_ok = 0,
                           chunks_failed = 0,
                           is_partitioned = excluded.is_partitioned",
            params![
                row.key.run.source_db,
                row.key.run.target_db,
                row.key.run.schema,
                row.key.table,
                row.key.run.task_mode,
                row.status.as_str(),
                row.snapshot_scn as i64,
                row.chunks_total as i64,
                row.is_partitioned as i64,
            ],
        )?;
        Ok(())
    }

    fn count_chunks_tx(tx: &Transaction<'_>, key: &TableKey, status: TaskStatus) -> Result<u64> {
        let n: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM chunk_progress WHERE {} AND task_status = ?6",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
                status.as_str(),
            ],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }
}

impl MetaGateway for SqliteMetaStore {
    fn table_progress(&self, key: &TableKey) -> Result<Option<TableProgress>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT task_status, snapshot_scn, chunks_total, chunks_ok, chunks_failed,
                            is_partitioned
                     FROM table_progress WHERE {}",
                    TABLE_KEY_WHERE
                ),
                params![
                    key.run.source_db,
                    key.run.target_db,
                    key.run.schema,
                    key.table,
                    key.run.task_mode,
                ],
                |r| Self::table_from_row(key.clone(), r),
            )
            .optional()?;
        Ok(row)
    }

    fn create_table_progress(&self, row: &TableProgress) -> Result<()> {
        Self::check_casing(&row.key)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO table_progress (source_db, target_db, schema_name, table_name, task_mode,
                                         task_status, snapshot_scn, chunks_total, chunks_ok,
                                         chunks_failed, is_partitioned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.key.run.source_db,
                row.key.run.target_db,
                row.key.run.schema,
                row.key.table,
                row.key.run.task_mode,
                row.status.as_str(),
                row.snapshot_scn as i64,
                row.chunks_total as i64,
                row.chunks_ok as i64,
                row.chunks_failed as i64,
                row.is_partitioned as i64,
            ],
        )?;
        Ok(())
    }

    fn update_table_status(&self, key: &TableKey, status: TaskStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "UPDATE table_progress SET task_status = ?6 WHERE {}",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
                status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn tables_with_status(&self, run: &RunKey, status: TaskStatus) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT table_name FROM table_progress WHERE {} AND task_status = ?5
             ORDER BY table_name",
            RUN_KEY_WHERE
        ))?;
        let rows = stmt.query_map(
            params![
                run.source_db,
                run.target_db,
                run.schema,
                run.task_mode,
                status.as_str()
            ],
            |r| r.get::<_, String>(0),
        )?;
        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }

    fn count_tables_with_status(&self, run: &RunKey, status: TaskStatus) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM table_progress WHERE {} AND task_status = ?5",
                RUN_KEY_WHERE
            ),
            params![
                run.source_db,
                run.target_db,
                run.schema,
                run.task_mode,
                status.as_str()
            ],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    fn delete_waiting_tables(&self, run: &RunKey, tables: &[String]) -> Result<()> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "DELETE FROM table_progress WHERE {} AND task_status = 'WAITING' AND table_name = ?5",
            RUN_KEY_WHERE
        ))?;
        for table in tables {
            stmt.execute(params![
                run.source_db,
                run.target_db,
                run.schema,
                run.task_mode,
                table.to_uppercase()
            ])?;
        }
        Ok(())
    }

    fn delete_success_not_configured(
        &self,
        run: &RunKey,
        configured: &[String],
    ) -> Result<Vec<String>> {
        let keep: Vec<String> = configured.iter().map(|t| t.to_uppercase()).collect();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = Vec::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT table_name FROM table_progress WHERE {} AND task_status = 'SUCCESS'",
                RUN_KEY_WHERE
            ))?;
            let rows = stmt.query_map(
                params![run.source_db, run.target_db, run.schema, run.task_mode],
                |r| r.get::<_, String>(0),
            )?;
            for name in rows {
                let name = name?;
                if !keep.contains(&name) {
                    removed.push(name);
                }
            }
        }
        {
            let mut del = tx.prepare(&format!(
                "DELETE FROM table_progress WHERE {} AND task_status = 'SUCCESS' AND table_name = ?5",
                RUN_KEY_WHERE
            ))?;
            for name in &removed {
                del.execute(params![
                    run.source_db,
                    run.target_db,
                    run.schema,
                    run.task_mode,
                    name
                ])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn chunks_with_status(
        &self,
        key: &TableKey,
        statuses: &[TaskStatus],
    ) -> Result<Vec<ChunkProgress>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        // statuses are fixed enum wire forms, safe to inline
        let status_list = statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT predicate, task_status, snapshot_scn, projection, target_schema,
                    target_table, output_path, info, error
             FROM chunk_progress WHERE {} AND task_status IN ({})
             ORDER BY output_path",
            TABLE_KEY_WHERE, status_list
        ))?;
        let rows = stmt.query_map(
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
            ],
            |r| {
                Ok(ChunkProgress {
                    key: key.clone(),
                    predicate: r.get(0)?,
                    status: r
                        .get::<_, String>(1)?
                        .parse()
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                    snapshot_scn: r.get::<_, i64>(2)? as u64,
                    projection: r.get(3)?,
                    target_schema: r.get(4)?,
                    target_table: r.get(5)?,
                    output_path: r.get(6)?,
                    info: r.get(7)?,
                    error: r.get(8)?,
                })
            },
        )?;
        let mut chunks = Vec::new();
        for chunk in rows {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }

    fn count_chunks(&self, key: &TableKey) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM chunk_progress WHERE {}",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
            ],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    fn count_chunks_with_status(&self, key: &TableKey, status: TaskStatus) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM chunk_progress WHERE {} AND task_status = ?6",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
                status.as_str(),
            ],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    fn update_chunk_status(
        &self,
        key: &TableKey,
        predicate: &str,
        status: TaskStatus,
        info: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        // A success transition clears stale diagnostics from earlier retries.
        conn.execute(
            &format!(
                "UPDATE chunk_progress SET task_status = ?6, info = ?7, error = ?8
                 WHERE {} AND predicate = ?9",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
                status.as_str(),
                info,
                error,
                predicate,
            ],
        )?;
        Ok(())
    }

    fn delete_chunks_for_run(&self, run: &RunKey) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM chunk_progress WHERE {}", RUN_KEY_WHERE),
            params![run.source_db, run.target_db, run.schema, run.task_mode],
        )?;
        Ok(())
    }

    fn create_chunks_with_table(
        &self,
        chunks: &[ChunkProgress],
        table: &TableProgress,
        insert_batch: usize,
    ) -> Result<()> {
        Self::check_casing(&table.key)?;
        for chunk in chunks {
            Self::check_casing(&chunk.key)?;
        }
        let batch = insert_batch.max(1);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // replanning a WAITING table rewrites its chunk rows wholesale
        tx.execute(
            &format!("DELETE FROM chunk_progress WHERE {}", TABLE_KEY_WHERE),
            params![
                table.key.run.source_db,
                table.key.run.target_db,
                table.key.run.schema,
                table.key.table,
                table.key.run.task_mode,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunk_progress (source_db, target_db, schema_name, table_name,
                                             task_mode, predicate, task_status, snapshot_scn,
                                             projection, target_schema, target_table, output_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for group in chunks.chunks(batch) {
                for chunk in group {
                    stmt.execute(params![
                        chunk.key.run.source_db,
                        chunk.key.run.target_db,
                        chunk.key.run.schema,
                        chunk.key.table,
                        chunk.key.run.task_mode,
                        chunk.predicate,
                        chunk.status.as_str(),
                        chunk.snapshot_scn as i64,
                        chunk.projection,
                        chunk.target_schema,
                        chunk.target_table,
                        chunk.output_path,
                    ])?;
                }
            }
        }
        Self::upsert_table_tx(&tx, table)?;
        tx.commit()?;
        Ok(())
    }

    fn finish_table_success(&self, key: &TableKey) -> Result<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let ok = Self::count_chunks_tx(&tx, key, TaskStatus::Success)?;
        tx.execute(
            &format!(
                "DELETE FROM chunk_progress WHERE {} AND task_status = 'SUCCESS'",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
            ],
        )?;
        tx.execute(
            &format!(
                "UPDATE table_progress SET task_status = 'SUCCESS', chunks_ok = ?6,
                        chunks_failed = 0
                 WHERE {}",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
                ok as i64,
            ],
        )?;
        tx.commit()?;
        Ok(ok)
    }

    fn finish_table_failed(&self, key: &TableKey) -> Result<(u64, u64)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let ok = Self::count_chunks_tx(&tx, key, TaskStatus::Success)?;
        let failed = Self::count_chunks_tx(&tx, key, TaskStatus::Failed)?;
        tx.execute(
            &format!(
                "UPDATE table_progress SET task_status = 'FAILED', chunks_ok = ?6,
                        chunks_failed = ?7
                 WHERE {}",
                TABLE_KEY_WHERE
            ),
            params![
                key.run.source_db,
                key.run.target_db,
                key.run.schema,
                key.table,
                key.run.task_mode,
                ok as i64,
                failed as i64,
            ],
        )?;
        tx.commit()?;
        Ok((ok, failed))
    }
}
