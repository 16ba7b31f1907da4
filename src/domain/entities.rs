//! # Domain Entities
//!
//! The nouns of the engine: checkpoint rows (`TableProgress`,
//! `ChunkProgress`), the identifiers that key them, the column catalog
//! entry fed to the projection compiler, and the final run report.
//!
//! Status strings are stored verbatim in the metadata store and typed by
//! operators on manual resume, so the canonical upper-case wire forms live
//! here next to the enum.

use crate::domain::errors::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Predicate sentinel meaning "read the whole table in one chunk".
pub const WHOLE_TABLE_PREDICATE: &str = "1 = 1";

/// Lifecycle state shared by tables and chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Terminal states never transition again within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WAITING" => Ok(TaskStatus::Waiting),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(ExportError::Metadata(format!(
                "unknown task status in metadata store: {:?}",
                other
            ))),
        }
    }
}

/// Identifies one migration run: the (source, target, schema, mode) tuple
/// every metadata row is scoped by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub source_db: String,
    pub target_db: String,
    /// Source schema, canonical upper case.
    pub schema: String,
    pub task_mode: String,
}

impl RunKey {
    pub fn new(source_db: &str, target_db: &str, schema: &str, task_mode: &str) -> Self {
        Self {
            source_db: source_db.to_string(),
            target_db: target_db.to_string(),
            schema: schema.to_uppercase(),
            task_mode: task_mode.to_string(),
        }
    }

    /// Scopes this run key down to a single table.
    pub fn table(&self, table: &str) -> TableKey {
        TableKey {
            run: self.clone(),
            table: table.to_uppercase(),
        }
    }
}

/// Identifies one table within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub run: RunKey,
    /// Source table, canonical upper case.
    pub table: String,
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.run.schema, self.table)
    }
}

/// One checkpoint row per table per run.
#[derive(Debug, Clone, PartialEq)]
pub struct TableProgress {
    pub key: TableKey,
    pub status: TaskStatus,
    /// Source SCN pinned at planning time; shared by all chunks of the table.
    pub snapshot_scn: u64,
    pub chunks_total: u64,
    pub chunks_ok: u64,
    pub chunks_failed: u64,
    pub is_partitioned: bool,
}

impl TableProgress {
    /// A fresh WAITING row with placeholder counters, created before the
    /// table has been planned.
    pub fn waiting(key: TableKey) -> Self {
        Self {
            key,
            status: TaskStatus::Waiting,
            snapshot_scn: 0,
            chunks_total: 0,
            chunks_ok: 0,
            chunks_failed: 0,
            is_partitioned: false,
        }
    }
}

/// One checkpoint row per chunk. FAILED rows survive their run and are the
/// resume handle; SUCCESS rows are deleted with the parent's SUCCESS flip.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkProgress {
    pub key: TableKey,
    pub status: TaskStatus,
    pub snapshot_scn: u64,
    /// Fully expanded SELECT list for the parent table.
    pub projection: String,
    /// Appended after WHERE to restrict the read; `1 = 1` means whole table.
    pub predicate: String,
    pub target_schema: String,
    pub target_table: String,
    pub output_path: String,
    pub info: Option<String>,
    pub error: Option<String>,
}

impl ChunkProgress {
    /// The query this chunk runs against the source.
    pub fn query(&self) -> String {
        format!(
            "SELECT {} FROM {}.{} WHERE {}",
            self.projection, self.key.run.schema, self.key.table, self.predicate
        )
    }

    /// Short human-readable identity used in failure diagnostics.
    pub fn describe(&self) -> String {
        format!("{} [{}]", self.key, self.predicate)
    }
}

/// One entry of a table's ordered column catalog, as read from the source
/// data dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    /// Declared scale, textual as the dictionary reports it. Only consulted
    /// for TIMESTAMP types.
    pub data_scale: Option<String>,
    /// Per-column collation; only populated when the source dictionary
    /// exposes it (12.2 and up).
    pub collation: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: &str, data_type: &str, data_scale: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            data_scale: data_scale.map(|s| s.to_string()),
            collation: None,
        }
    }

    pub fn with_collation(mut self, collation: Option<&str>) -> Self {
        self.collation = collation.map(|c| c.to_string());
        self
    }
}

/// Final accounting the orchestrator reports at exit.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tables_total: usize,
    pub tables_success: u64,
    pub tables_failed: u64,
    /// Tables whose planning aborted (catalog or projection errors), with
    /// the reason. They stay WAITING in the metadata store.
    pub planning_failures: Vec<(String, String)>,
    pub output_dir: String,
    pub elapsed_secs: f64,
}

impl RunReport {
    /// True when every configured table finished SUCCESS.
    pub fn is_clean(&self) -> bool {
        self.tables_failed == 0 && self.planning_failures.is_empty()
    }
}
