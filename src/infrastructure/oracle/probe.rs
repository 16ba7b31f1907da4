//! Dictionary probe against the Oracle source.
//!
//! Everything the planner asks about the source comes through here:
//! version, snapshot SCN, character set, table lists, optimizer row
//! statistics, and the ordered column catalog.

use crate::domain::entities::ColumnInfo;
use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::oracle::connection_manager::SourceConnectionManager;
use crate::ports::source_port::SourceProbe;
use log::debug;
use r2d2::{Pool, PooledConnection};
use std::sync::Arc;

const SQL_DB_VERSION: &str =
    "SELECT VALUE FROM NLS_DATABASE_PARAMETERS WHERE PARAMETER = 'NLS_RDBMS_VERSION'";
const SQL_CURRENT_SCN: &str = "SELECT MIN(CURRENT_SCN) FROM GV$DATABASE";
const SQL_DB_LANGUAGE: &str = "SELECT USERENV('LANGUAGE') FROM DUAL";
const SQL_SCHEMA_TABLES: &str =
    "SELECT TABLE_NAME FROM ALL_TABLES WHERE OWNER = :1 ORDER BY TABLE_NAME";
const SQL_PARTITION_TABLES: &str =
    "SELECT TABLE_NAME FROM ALL_PART_TABLES WHERE OWNER = :1 ORDER BY TABLE_NAME";
const SQL_STATS_ROWS: &str =
    "SELECT NVL(NUM_ROWS, 0) FROM ALL_TABLES WHERE OWNER = :1 AND TABLE_NAME = :2";
const SQL_TABLE_COLUMNS: &str = "
    SELECT COLUMN_NAME, DATA_TYPE, TO_CHAR(DATA_SCALE)
    FROM ALL_TAB_COLUMNS
    WHERE OWNER = :1 AND TABLE_NAME = :2
    ORDER BY COLUMN_ID
";
// the COLLATION column only exists from 12.2 on, so this variant is gated
// by the capability flag
const SQL_TABLE_COLUMNS_COLLATION: &str = "
    SELECT COLUMN_NAME, DATA_TYPE, TO_CHAR(DATA_SCALE), COLLATION
    FROM ALL_TAB_COLUMNS
    WHERE OWNER = :1 AND TABLE_NAME = :2
    ORDER BY COLUMN_ID
";

/// `SourceProbe` over a shared Oracle pool.
pub struct OracleProbe {
    pool: Arc<Pool<SourceConnectionManager>>,
}

impl OracleProbe {
    pub fn new(pool: Arc<Pool<SourceConnectionManager>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConnection<SourceConnectionManager>> {
        self.pool.get().map_err(ExportError::from)
    }

    fn string_list(&self, sql: &str, schema: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let rows = conn.query(sql, &[&schema.to_uppercase()])?;
        let mut names = Vec::new();
        for row in rows {
            let row = row?;
            names.push(row.get::<usize, String>(0)?);
        }
        Ok(names)
    }
}

impl SourceProbe for OracleProbe {
    fn version(&self) -> Result<String> {
        let conn = self.conn()?;
        let row = conn.query_row(SQL_DB_VERSION, &[])?;
        Ok(row.get::<usize, String>(0)?)
    }

    fn current_scn(&self) -> Result<u64> {
        let conn = self.conn()?;
        let row = conn.query_row(SQL_CURRENT_SCN, &[])?;
        Ok(row.get::<usize, u64>(0)?)
    }

    /// NLS language string looks like `AMERICAN_AMERICA.ZHS16GBK`; the part
    /// after the dot is the character set.
    fn character_set(&self) -> Result<String> {
        let conn = self.conn()?;
        let row = conn.query_row(SQL_DB_LANGUAGE, &[])?;
        let language: String = row.get(0)?;
        language
            .rsplit('.')
            .next()
            .map(|cs| cs.to_string())
            .ok_or_else(|| {
                ExportError::Oracle(format!("unexpected NLS language format: {}", language))
            })
    }

    fn schema_tables(&self, schema: &str) -> Result<Vec<String>> {
        self.string_list(SQL_SCHEMA_TABLES, schema)
    }

    fn partitioned_tables(&self, schema: &str) -> Result<Vec<String>> {
        self.string_list(SQL_PARTITION_TABLES, schema)
    }

    fn stats_row_count(&self, schema: &str, table: &str) -> Result<u64> {
        let conn = self.conn()?;
        let mut rows = conn.query(
            SQL_STATS_ROWS,
            &[&schema.to_uppercase(), &table.to_uppercase()],
        )?;
        match rows.next() {
            Some(row) => Ok(row?.get::<usize, u64>(0)?),
            None => Ok(0),
        }
    }

    /// Ordered column catalog. On collation-capable sources the per-column
    /// collation is read alongside name, type, and scale; older
    /// dictionaries have no COLLATION column, so the plain query runs.
    fn table_columns(
        &self,
        schema: &str,
        table: &str,
        collation_capable: bool,
    ) -> Result<Vec<ColumnInfo>> {
        debug!(
            "reading catalog for {}.{} (collation metadata: {})",
            schema, table, collation_capable
        );
        let sql = if collation_capable {
            SQL_TABLE_COLUMNS_COLLATION
        } else {
            SQL_TABLE_COLUMNS
        };
        let conn = self.conn()?;
        let rows = conn.query(sql, &[&schema.to_uppercase(), &table.to_uppercase()])?;
        let mut columns = Vec::new();
        for row in rows {
            let row = row?;
            let collation = if collation_capable {
                row.get::<usize, Option<String>>(3)?
            } else {
                None
            };
            columns.push(ColumnInfo {
                name: row.get(0)?,
                data_type: row.get(1)?,
                data_scale: row.get::<usize, Option<String>>(2)?,
                collation,
            });
        }
        Ok(columns)
    }
}
