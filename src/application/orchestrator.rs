//! # Orchestrator
//!
//! Entry point for a migration run. It owns the sequence: source
//! capability gate → table discovery and filtering → planner → executor →
//! exit report. It talks to the outside world only through the ports, so
//! the whole flow is testable against fakes.

use crate::application::executor::Executor;
use crate::application::planner::{Planner, PlannerSettings};
use crate::config::AppConfig;
use crate::domain::cancel::CancelToken;
use crate::domain::entities::{RunKey, RunReport, TaskStatus};
use crate::domain::errors::{ExportError, Result};
use crate::ports::meta_port::MetaGateway;
use crate::ports::source_port::{ChunkSplitter, SourceProbe, SourceReader};
use crate::ports::writer_port::RecordWriter;
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Minimum source version the engine runs against.
pub const REQUIRED_SOURCE_VERSION: &str = "11.2.0.2";
/// Version at which the dictionary exposes per-column collation metadata.
pub const COLLATION_SOURCE_VERSION: &str = "12.2";

/// Dotted version string → comparable component vector. Non-numeric parts
/// are skipped, so banner suffixes don't disturb the ordering.
pub fn version_ordinal(version: &str) -> Vec<u32> {
    version
        .split(|c: char| c == '.' || c == '-' || c.is_whitespace())
        .filter_map(|part| part.parse::<u32>().ok())
        .collect()
}

pub struct Orchestrator {
    probe: Arc<dyn SourceProbe>,
    splitter: Arc<dyn ChunkSplitter>,
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn RecordWriter>,
    gateway: Arc<dyn MetaGateway>,
    config: AppConfig,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        probe: Arc<dyn SourceProbe>,
        splitter: Arc<dyn ChunkSplitter>,
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn RecordWriter>,
        gateway: Arc<dyn MetaGateway>,
        config: AppConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            probe,
            splitter,
            reader,
            writer,
            gateway,
            config,
            cancel,
        }
    }

    /// Runs the whole migration and returns the final accounting.
    pub fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        let run = self.run_key();
        info!(
            "schema {} full table csv migration start, output {}",
            run.schema, self.config.export.output_dir
        );

        let version = self.probe.version()?;
        if version_ordinal(&version) < version_ordinal(REQUIRED_SOURCE_VERSION) {
            return Err(ExportError::CapabilityTooOld(format!(
                "oracle version [{}] is below required [{}]",
                version, REQUIRED_SOURCE_VERSION
            )));
        }
        let collation_capable =
            version_ordinal(&version) >= version_ordinal(COLLATION_SOURCE_VERSION);
        info!(
            "source version {} (collation metadata: {})",
            version, collation_capable
        );

        let exporters = self.discover_tables(&run)?;
        if exporters.is_empty() {
            info!("no tables to migrate after filtering");
            return Ok(RunReport {
                tables_total: 0,
                tables_success: 0,
                tables_failed: 0,
                planning_failures: Vec::new(),
                output_dir: self.config.export.output_dir.clone(),
                elapsed_secs: start.elapsed().as_secs_f64(),
            });
        }
        info!("{} tables configured: {:?}", exporters.len(), exporters);

        let planner = Planner::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.probe),
            Arc::clone(&self.splitter),
            run.clone(),
            PlannerSettings {
                output_dir: self.config.export.output_dir.clone(),
                target_schema: self.config.target.schema.clone(),
                resume_allowed: self.config.export.resume_allowed,
                chunk_rows: self.config.export.chunk_rows,
                insert_batch: self.config.export.insert_batch,
                planning_concurrency: self.config.export.planning_concurrency,
            },
            self.cancel.clone(),
        );
        let plan = planner.plan(&exporters, collation_capable)?;
        for (table, reason) in &plan.planning_failures {
            warn!("table {} was not planned: {}", table, reason);
        }

        let charset = self.probe.character_set()?;
        let executor = Executor::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.reader),
            Arc::clone(&self.writer),
            run.clone(),
            charset,
            self.config.export.table_concurrency,
            self.config.export.chunk_concurrency,
            self.cancel.clone(),
        );
        executor.run(&plan)?;

        // final counts come from the store, not from in-process tallies
        let report = RunReport {
            tables_total: exporters.len(),
            tables_success: self
                .gateway
                .count_tables_with_status(&run, TaskStatus::Success)?,
            tables_failed: self
                .gateway
                .count_tables_with_status(&run, TaskStatus::Failed)?,
            planning_failures: plan.planning_failures,
            output_dir: self.config.export.output_dir.clone(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        self.write_report(&report)?;
        info!(
            "schema {} csv migration finished: {} success, {} failed, {} total, output {}, cost {:.1}s",
            run.schema,
            report.tables_success,
            report.tables_failed,
            report.tables_total,
            report.output_dir,
            report.elapsed_secs
        );
        if !report.is_clean() {
            warn!("run finished with failures, inspect table_progress and chunk_progress");
        }
        Ok(report)
    }

    /// Drops a machine-readable copy of the final accounting next to the
    /// artifacts.
    fn write_report(&self, report: &RunReport) -> Result<()> {
        std::fs::create_dir_all(&report.output_dir)?;
        let path = std::path::Path::new(&report.output_dir).join("report.json");
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, report)
            .map_err(|e| ExportError::Writer(format!("run report: {}", e)))?;
        Ok(())
    }

    fn run_key(&self) -> RunKey {
        RunKey::new(
            &self.config.export.source_db_id,
            &self.config.export.target_db_id,
            &self.config.database.schema,
            &self.config.export.task_mode,
        )
    }

    /// Schema table list, upper-cased and filtered by the configured
    /// include and exclude lists.
    fn discover_tables(&self, run: &RunKey) -> Result<Vec<String>> {
        let include: Option<Vec<String>> = self
            .config
            .export
            .tables
            .as_ref()
            .map(|ts| ts.iter().map(|t| t.to_uppercase()).collect());
        let exclude: Vec<String> = self
            .config
            .export
            .exclude_tables
            .as_ref()
            .map(|ts| ts.iter().map(|t| t.to_uppercase()).collect())
            .unwrap_or_default();

        let mut tables = Vec::new();
        for table in self.probe.schema_tables(&run.schema)? {
            let upper = table.to_uppercase();
            if exclude.contains(&upper) {
                info!("skipping excluded table {}.{}", run.schema, upper);
                continue;
            }
            if let Some(include) = &include {
                if !include.contains(&upper) {
                    continue;
                }
            }
            tables.push(upper);
        }
        tables.sort();
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, DatabaseConfig, ExportConfig, MetaConfig, TargetConfig};
    use crate::domain::entities::ColumnInfo;
    use crate::infrastructure::sqlite::meta_store::SqliteMetaStore;
    use crate::ports::source_port::RowCursor;
    use crate::ports::writer_port::WriteRequest;

    #[test]
    fn version_ordinal_orders_dotted_versions() {
        assert!(version_ordinal("11.2.0.2") < version_ordinal("19.3.0.0.0"));
        assert!(version_ordinal("11.2.0.1") < version_ordinal("11.2.0.2"));
        assert!(version_ordinal("12.2") >= version_ordinal("12.2"));
        assert!(version_ordinal("9.2.0.8") < version_ordinal("11.2.0.2"));
    }

    struct StubProbe {
        version: String,
    }

    impl SourceProbe for StubProbe {
        fn version(&self) -> crate::domain::errors::Result<String> {
            Ok(self.version.clone())
        }
        fn current_scn(&self) -> crate::domain::errors::Result<u64> {
            Ok(1234)
        }
        fn character_set(&self) -> crate::domain::errors::Result<String> {
            Ok("AL32UTF8".to_string())
        }
        fn schema_tables(&self, _schema: &str) -> crate::domain::errors::Result<Vec<String>> {
            Ok(vec!["ORDERS".to_string(), "AUDIT_LOG".to_string()])
        }
        fn partitioned_tables(&self, _schema: &str) -> crate::domain::errors::Result<Vec<String>> {
            Ok(vec![])
        }
        fn stats_row_count(
            &self,
            _schema: &str,
            _table: &str,
        ) -> crate::domain::errors::Result<u64> {
            Ok(0)
        }
        fn table_columns(
            &self,
            _schema: &str,
            _table: &str,
            _collation_capable: bool,
        ) -> crate::domain::errors::Result<Vec<ColumnInfo>> {
            Ok(vec![ColumnInfo::new("ID", "NUMBER", None)])
        }
    }

    struct StubSplitter;
    impl ChunkSplitter for StubSplitter {
        fn rowid_chunks(
            &self,
            _schema: &str,
            _table: &str,
            _chunk_rows: u64,
            _worker_id: usize,
        ) -> crate::domain::errors::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    struct EmptyCursor {
        columns: Vec<String>,
    }
    impl RowCursor for EmptyCursor {
        fn columns(&self) -> &[String] {
            &self.columns
        }
        fn next_row(&mut self) -> Option<crate::domain::errors::Result<Vec<Option<String>>>> {
            None
        }
    }

    struct StubReader;
    impl SourceReader for StubReader {
        fn stream(
            &self,
            _query: &str,
            _snapshot_scn: u64,
            _cancel: &CancelToken,
            consume: &mut dyn FnMut(&mut dyn RowCursor) -> crate::domain::errors::Result<()>,
        ) -> crate::domain::errors::Result<()> {
            let mut cursor = EmptyCursor {
                columns: vec!["ID".to_string()],
            };
            consume(&mut cursor)
        }
    }

    struct NullWriter;
    impl RecordWriter for NullWriter {
        fn write_chunk(
            &self,
            _req: &WriteRequest<'_>,
            cursor: &mut dyn RowCursor,
            _cancel: &CancelToken,
        ) -> crate::domain::errors::Result<u64> {
            let mut n = 0;
            while cursor.next_row().is_some() {
                n += 1;
            }
            Ok(n)
        }
    }

    fn config(output_dir: &str) -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                username: "SRC".to_string(),
                password: None,
                host: "localhost".to_string(),
                port: 1521,
                service: "ORCL".to_string(),
                schema: "SRC".to_string(),
            },
            target: TargetConfig {
                schema: "DST".to_string(),
            },
            meta: MetaConfig {
                path: ":memory:".to_string(),
            },
            export: ExportConfig {
                output_dir: output_dir.to_string(),
                resume_allowed: true,
                table_concurrency: 2,
                chunk_concurrency: 2,
                planning_concurrency: 2,
                chunk_rows: 100_000,
                insert_batch: 100,
                prefetch_rows: 1000,
                delimiter: ",".to_string(),
                write_header: true,
                null_as: String::new(),
                source_db_id: "ORACLE".to_string(),
                target_db_id: "MYSQL".to_string(),
                task_mode: "CSV".to_string(),
                tables: None,
                exclude_tables: Some(vec!["AUDIT_LOG".to_string()]),
            },
        }
    }

    fn orchestrator(version: &str, cfg: AppConfig, store: Arc<SqliteMetaStore>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(StubProbe {
                version: version.to_string(),
            }),
            Arc::new(StubSplitter),
            Arc::new(StubReader),
            Arc::new(NullWriter),
            store,
            cfg,
            CancelToken::new(),
        )
    }

    #[test]
    fn old_source_version_is_rejected_before_any_mutation() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let orch = orchestrator("10.2.0.4", config("/out"), store.clone());
        let err = orch.run().unwrap_err();
        assert!(matches!(err, ExportError::CapabilityTooOld(_)));
        let run = RunKey::new("ORACLE", "MYSQL", "SRC", "CSV");
        assert_eq!(
            store
                .count_tables_with_status(&run, TaskStatus::Waiting)
                .unwrap(),
            0
        );
    }

    #[test]
    fn end_to_end_run_with_fakes_reports_success() {
        let out = tempfile::tempdir().unwrap();
        let out_dir = out.path().to_str().unwrap();
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let orch = orchestrator("19.3.0.0.0", config(out_dir), store.clone());
        let report = orch.run().unwrap();

        // AUDIT_LOG is excluded, ORDERS migrates via a whole-table chunk
        assert_eq!(report.tables_total, 1);
        assert_eq!(report.tables_success, 1);
        assert_eq!(report.tables_failed, 0);
        assert!(report.is_clean());

        let run = RunKey::new("ORACLE", "MYSQL", "SRC", "CSV");
        assert_eq!(store.count_chunks(&run.table("ORDERS")).unwrap(), 0);
        assert!(out.path().join("report.json").exists());
    }
}
