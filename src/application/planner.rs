//! # Planner
//!
//! Makes the metadata store reflect exactly the current configuration and
//! the reality on disk before any chunk executes.
//!
//! The reconciliation order matters and mirrors the checkpoint semantics:
//! reset (when resume is off), reap stale successes, fail fast on prior
//! failures, ensure a row per configured table, classify, then plan the
//! WAITING tables on a bounded pool. A table is replanned only from
//! WAITING; a consistent RUNNING table keeps its chunk rows untouched so a
//! resume never re-reads completed chunks.

use crate::domain::cancel::CancelToken;
use crate::domain::entities::{
    ChunkProgress, RunKey, TableProgress, TaskStatus, WHOLE_TABLE_PREDICATE,
};
use crate::domain::errors::{ExportError, Result};
use crate::domain::layout::chunk_output_path;
use crate::domain::projection::compile_projection;
use crate::ports::meta_port::MetaGateway;
use crate::ports::source_port::{ChunkSplitter, SourceProbe};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::sync::Arc;

/// What the planner hands to the executor.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// RUNNING tables with consistent checkpoints; executed first because
    /// their chunks may already be partially done.
    pub resumable: Vec<String>,
    /// Tables planned by this run (WAITING with fresh chunk rows).
    pub planned: Vec<String>,
    /// Tables whose planning aborted (catalog, projection, or splitter
    /// errors), with the reason. They stay WAITING without chunk rows.
    pub planning_failures: Vec<(String, String)>,
}

/// Planner settings, lifted out of the full application config.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub output_dir: String,
    pub target_schema: String,
    pub resume_allowed: bool,
    pub chunk_rows: u64,
    pub insert_batch: usize,
    pub planning_concurrency: usize,
}

pub struct Planner {
    gateway: Arc<dyn MetaGateway>,
    probe: Arc<dyn SourceProbe>,
    splitter: Arc<dyn ChunkSplitter>,
    run: RunKey,
    settings: PlannerSettings,
    cancel: CancelToken,
}

impl Planner {
    pub fn new(
        gateway: Arc<dyn MetaGateway>,
        probe: Arc<dyn SourceProbe>,
        splitter: Arc<dyn ChunkSplitter>,
        run: RunKey,
        settings: PlannerSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            gateway,
            probe,
            splitter,
            run,
            settings,
            cancel,
        }
    }

    /// Reconciles metadata with `exporters` (the post-filter table list)
    /// and plans every WAITING table.
    pub fn plan(&self, exporters: &[String], collation_capable: bool) -> Result<ExecutionPlan> {
        if self.settings.output_dir.trim().is_empty() {
            return Err(ExportError::Config(
                "output_dir can't be empty, please configure".to_string(),
            ));
        }
        let tables: Vec<String> = exporters.iter().map(|t| t.to_uppercase()).collect();

        if !self.settings.resume_allowed {
            self.gateway.delete_chunks_for_run(&self.run)?;
            self.gateway.delete_waiting_tables(&self.run, &tables)?;
            info!(
                "checkpoint disabled, cleared chunk rows and waiting tables for schema {}",
                self.run.schema
            );
        }

        let reaped = self.gateway.delete_success_not_configured(&self.run, &tables)?;
        if !reaped.is_empty() {
            warn!(
                "cleared {} success rows for tables no longer configured: {:?}",
                reaped.len(),
                reaped
            );
        }

        let failed = self
            .gateway
            .tables_with_status(&self.run, TaskStatus::Failed)?;
        if !failed.is_empty() {
            return Err(ExportError::PriorFailure(format!(
                "schema [{}] mode [{}] has failed tables {:?}: inspect table_progress and \
                 chunk_progress, then either update task_status to RUNNING (upper case) to \
                 resume, or delete the rows and rerun",
                self.run.schema, self.run.task_mode, failed
            )));
        }

        for table in &tables {
            let key = self.run.table(table);
            if self.gateway.table_progress(&key)?.is_none() {
                self.gateway
                    .create_table_progress(&TableProgress::waiting(key))?;
            }
        }

        let mut to_plan = Vec::new();
        let mut already_planned = Vec::new();
        let mut resumable = Vec::new();
        let mut corrupt = Vec::new();
        for table in &tables {
            let key = self.run.table(table);
            let row = self.gateway.table_progress(&key)?.ok_or_else(|| {
                ExportError::Metadata(format!("table_progress row vanished for {}", key))
            })?;
            match row.status {
                TaskStatus::Waiting => {
                    // A WAITING table that already carries a complete plan
                    // (planned but never executed) keeps its rows untouched,
                    // so replanning stays idempotent.
                    if row.chunks_total > 0
                        && self.gateway.count_chunks(&key)? == row.chunks_total
                    {
                        debug!("table {} already planned, keeping chunk rows", key);
                        already_planned.push(table.clone());
                    } else {
                        to_plan.push(table.clone());
                    }
                }
                TaskStatus::Running => {
                    let children = self.gateway.count_chunks(&key)?;
                    if children == row.chunks_total {
                        resumable.push(table.clone());
                    } else {
                        corrupt.push(format!(
                            "{} (chunks_total {}, chunk rows {})",
                            key, row.chunks_total, children
                        ));
                    }
                }
                TaskStatus::Success => debug!("table {} already migrated, skip", key),
                TaskStatus::Failed => {
                    return Err(ExportError::PriorFailure(format!(
                        "table {} flipped to FAILED during reconciliation",
                        key
                    )))
                }
            }
        }
        if !corrupt.is_empty() {
            return Err(ExportError::ChunkInconsistency(format!(
                "can't resume, checkpoint rows inconsistent for: {}; rerun with resume disabled",
                corrupt.join(", ")
            )));
        }

        let mut plan = ExecutionPlan {
            resumable,
            planned: already_planned,
            ..Default::default()
        };
        if to_plan.is_empty() {
            return Ok(plan);
        }

        // One snapshot per planner invocation, stored per table.
        let snapshot_scn = self.probe.current_scn()?;
        let partitioned = self.probe.partitioned_tables(&self.run.schema)?;
        info!(
            "planning {} tables at snapshot scn {}",
            to_plan.len(),
            snapshot_scn
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.planning_concurrency.max(1))
            .build()
            .map_err(|e| ExportError::Config(format!("planning pool: {}", e)))?;
        let results: Vec<(String, Result<usize>)> = pool.install(|| {
            to_plan
                .par_iter()
                .enumerate()
                .map(|(worker_id, table)| {
                    let res = self.plan_table(
                        table,
                        worker_id,
                        snapshot_scn,
                        &partitioned,
                        collation_capable,
                    );
                    (table.clone(), res)
                })
                .collect()
        });

        for (table, res) in results {
            match res {
                Ok(chunks) => {
                    debug!("table {}.{} planned into {} chunks", self.run.schema, table, chunks);
                    plan.planned.push(table);
                }
                // checkpoint state is uncertain, stop the run
                Err(e @ ExportError::Metadata(_)) => return Err(e),
                Err(ExportError::Canceled) => return Err(ExportError::Canceled),
                Err(e) => {
                    error!("planning failed for {}.{}: {}", self.run.schema, table, e);
                    plan.planning_failures.push((table, e.to_string()));
                }
            }
        }
        Ok(plan)
    }

    /// Plans one WAITING table: catalog → projection → statistics →
    /// splitter → chunk rows, committed together with the parent counters.
    /// Returns the number of chunks created.
    fn plan_table(
        &self,
        table: &str,
        worker_id: usize,
        snapshot_scn: u64,
        partitioned: &[String],
        collation_capable: bool,
    ) -> Result<usize> {
        if self.cancel.is_canceled() {
            return Err(ExportError::Canceled);
        }
        let key = self.run.table(table);
        let columns = self
            .probe
            .table_columns(&self.run.schema, table, collation_capable)?;
        if columns.is_empty() {
            return Err(ExportError::Config(format!(
                "table {} has no columns in the source catalog",
                key
            )));
        }
        let projection = compile_projection(&columns)?;
        let is_partitioned = partitioned.iter().any(|t| t == table);

        let stats_rows = self.probe.stats_row_count(&self.run.schema, table)?;
        let predicates = if stats_rows == 0 {
            info!(
                "table {} reports zero statistics rows, single whole-table chunk",
                key
            );
            vec![WHOLE_TABLE_PREDICATE.to_string()]
        } else {
            let ranges =
                self.splitter
                    .rowid_chunks(&self.run.schema, table, self.settings.chunk_rows, worker_id)?;
            if ranges.is_empty() {
                info!("splitter produced no ranges for {}, single whole-table chunk", key);
                vec![WHOLE_TABLE_PREDICATE.to_string()]
            } else {
                ranges
            }
        };

        let target_schema = self.settings.target_schema.to_uppercase();
        let target_table = key.table.clone();
        let chunks: Vec<ChunkProgress> = predicates
            .iter()
            .enumerate()
            .map(|(idx, predicate)| ChunkProgress {
                key: key.clone(),
                status: TaskStatus::Waiting,
                snapshot_scn,
                projection: projection.clone(),
                predicate: predicate.clone(),
                target_schema: target_schema.clone(),
                target_table: target_table.clone(),
                output_path: chunk_output_path(
                    &self.settings.output_dir,
                    &self.run.schema,
                    &key.table,
                    &target_schema,
                    &target_table,
                    idx,
                )
                .to_string_lossy()
                .into_owned(),
                info: None,
                error: None,
            })
            .collect();

        let parent = TableProgress {
            key,
            status: TaskStatus::Waiting,
            snapshot_scn,
            chunks_total: chunks.len() as u64,
            chunks_ok: 0,
            chunks_failed: 0,
            is_partitioned,
        };
        self.gateway
            .create_chunks_with_table(&chunks, &parent, self.settings.insert_batch)?;
        Ok(chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ColumnInfo;
    use crate::infrastructure::sqlite::meta_store::SqliteMetaStore;
    use std::collections::HashMap;

    /// Probe fake serving a fixed catalog and statistics per table.
    struct FakeProbe {
        columns: HashMap<String, Vec<ColumnInfo>>,
        stats: HashMap<String, u64>,
        scn: u64,
    }

    impl SourceProbe for FakeProbe {
        fn version(&self) -> Result<String> {
            Ok("19.3.0.0.0".to_string())
        }
        fn current_scn(&self) -> Result<u64> {
            Ok(self.scn)
        }
        fn character_set(&self) -> Result<String> {
            Ok("AL32UTF8".to_string())
        }
        fn schema_tables(&self, _schema: &str) -> Result<Vec<String>> {
            Ok(self.columns.keys().cloned().collect())
        }
        fn partitioned_tables(&self, _schema: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn stats_row_count(&self, _schema: &str, table: &str) -> Result<u64> {
            Ok(*self.stats.get(table).unwrap_or(&0))
        }
        fn table_columns(
            &self,
            _schema: &str,
            table: &str,
            _collation_capable: bool,
        ) -> Result<Vec<ColumnInfo>> {
            self.columns
                .get(table)
                .cloned()
                .ok_or_else(|| ExportError::Oracle(format!("ORA-00942: {} does not exist", table)))
        }
    }

    /// Splitter fake returning canned ranges.
    struct FakeSplitter {
        ranges: Vec<String>,
    }

    impl FakeSplitter {
        fn with_ranges(ranges: &[&str]) -> Self {
            Self {
                ranges: ranges.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl ChunkSplitter for FakeSplitter {
        fn rowid_chunks(
            &self,
            _schema: &str,
            _table: &str,
            _chunk_rows: u64,
            _worker_id: usize,
        ) -> Result<Vec<String>> {
            Ok(self.ranges.clone())
        }
    }

    fn settings() -> PlannerSettings {
        PlannerSettings {
            output_dir: "/out".to_string(),
            target_schema: "DST".to_string(),
            resume_allowed: true,
            chunk_rows: 100_000,
            insert_batch: 50,
            planning_concurrency: 2,
        }
    }

    fn run_key() -> RunKey {
        RunKey::new("ORACLE", "MYSQL", "SRC", "CSV")
    }

    fn planner_with(
        store: Arc<SqliteMetaStore>,
        probe: FakeProbe,
        splitter: FakeSplitter,
        settings: PlannerSettings,
    ) -> Planner {
        Planner::new(
            store,
            Arc::new(probe),
            Arc::new(splitter),
            run_key(),
            settings,
            CancelToken::new(),
        )
    }

    fn probe_one_table(table: &str, rows: u64) -> FakeProbe {
        let mut columns = HashMap::new();
        columns.insert(
            table.to_string(),
            vec![
                ColumnInfo::new("ID", "NUMBER", None),
                ColumnInfo::new("TS", "TIMESTAMP(3)", Some("3")),
            ],
        );
        let mut stats = HashMap::new();
        stats.insert(table.to_string(), rows);
        FakeProbe {
            columns,
            stats,
            scn: 9_000,
        }
    }

    #[test]
    fn zero_row_table_gets_single_whole_table_chunk() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let splitter = FakeSplitter::with_ranges(&["should not be called"]);
        let planner = planner_with(store.clone(), probe_one_table("T", 0), splitter, settings());

        let plan = planner.plan(&["T".to_string()], true).unwrap();
        assert_eq!(plan.planned, vec!["T".to_string()]);
        assert!(plan.planning_failures.is_empty());

        let key = run_key().table("T");
        let chunks = store
            .chunks_with_status(&key, &[TaskStatus::Waiting])
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].predicate, WHOLE_TABLE_PREDICATE);
        assert_eq!(
            chunks[0].projection,
            "ID,TO_CHAR(TS,'yyyy-mm-dd hh24:mi:ss.ff3') AS TS"
        );
        assert!(chunks[0].output_path.ends_with("DST.T.0.csv"));
        assert_eq!(chunks[0].snapshot_scn, 9_000);

        let row = store.table_progress(&key).unwrap().unwrap();
        assert_eq!(row.chunks_total, 1);
        assert_eq!(row.snapshot_scn, 9_000);
    }

    #[test]
    fn splitter_ranges_become_chunk_rows() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let splitter = FakeSplitter::with_ranges(&[
            "ROWID BETWEEN 'AAA' AND 'BBB'",
            "ROWID BETWEEN 'BBC' AND 'CCC'",
        ]);
        let planner = planner_with(store.clone(), probe_one_table("T", 500_000), splitter, settings());

        planner.plan(&["T".to_string()], true).unwrap();

        let key = run_key().table("T");
        assert_eq!(store.count_chunks(&key).unwrap(), 2);
        let row = store.table_progress(&key).unwrap().unwrap();
        assert_eq!(row.chunks_total, 2);

        let chunks = store
            .chunks_with_status(&key, &[TaskStatus::Waiting])
            .unwrap();
        let paths: Vec<&str> = chunks.iter().map(|c| c.output_path.as_str()).collect();
        assert!(paths.contains(&"/out/SRC/T/DST.T.0.csv"));
        assert!(paths.contains(&"/out/SRC/T/DST.T.1.csv"));
    }

    #[test]
    fn empty_splitter_result_falls_back_to_whole_table() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let splitter = FakeSplitter::with_ranges(&[]);
        let planner = planner_with(store.clone(), probe_one_table("T", 10), splitter, settings());

        planner.plan(&["T".to_string()], true).unwrap();
        let chunks = store
            .chunks_with_status(&run_key().table("T"), &[TaskStatus::Waiting])
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].predicate, WHOLE_TABLE_PREDICATE);
    }

    #[test]
    fn replanning_with_resume_is_idempotent() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let key = run_key().table("T");

        let planner = planner_with(
            store.clone(),
            probe_one_table("T", 500),
            FakeSplitter::with_ranges(&["R0", "R1"]),
            settings(),
        );
        planner.plan(&["T".to_string()], true).unwrap();
        let before_chunks = store
            .chunks_with_status(
                &key,
                &[TaskStatus::Waiting, TaskStatus::Failed, TaskStatus::Success],
            )
            .unwrap();
        let before_table = store.table_progress(&key).unwrap().unwrap();

        // the second pass must leave every row untouched
        let planner2 = planner_with(
            store.clone(),
            probe_one_table("T", 500),
            FakeSplitter::with_ranges(&["R0", "R1"]),
            settings(),
        );
        let plan2 = planner2.plan(&["T".to_string()], true).unwrap();
        // still handed to the executor, just not replanned
        assert_eq!(plan2.planned, vec!["T".to_string()]);

        let after_chunks = store
            .chunks_with_status(
                &key,
                &[TaskStatus::Waiting, TaskStatus::Failed, TaskStatus::Success],
            )
            .unwrap();
        let after_table = store.table_progress(&key).unwrap().unwrap();
        assert_eq!(before_chunks, after_chunks);
        assert_eq!(before_table, after_table);
    }

    #[test]
    fn prior_failed_table_blocks_planning() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let mut row = TableProgress::waiting(run_key().table("T"));
        row.status = TaskStatus::Failed;
        store.create_table_progress(&row).unwrap();

        let planner = planner_with(
            store,
            probe_one_table("T", 0),
            FakeSplitter::with_ranges(&[]),
            settings(),
        );
        let err = planner.plan(&["T".to_string()], true).unwrap_err();
        assert!(matches!(err, ExportError::PriorFailure(_)));
    }

    #[test]
    fn consistent_running_table_is_resumable_without_replanning() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let key = run_key().table("T");

        // first run plans the table, then pretend the executor started it
        let planner = planner_with(
            store.clone(),
            probe_one_table("T", 500),
            FakeSplitter::with_ranges(&["R0", "R1", "R2", "R3"]),
            settings(),
        );
        planner.plan(&["T".to_string()], true).unwrap();
        store
            .update_table_status(&key, TaskStatus::Running)
            .unwrap();

        let splitter = FakeSplitter::with_ranges(&["MUST NOT RUN"]);
        let planner2 = planner_with(store.clone(), probe_one_table("T", 500), splitter, settings());
        let plan = planner2.plan(&["T".to_string()], true).unwrap();

        assert_eq!(plan.resumable, vec!["T".to_string()]);
        assert!(plan.planned.is_empty());
        assert_eq!(store.count_chunks(&key).unwrap(), 4);
    }

    #[test]
    fn running_table_with_missing_chunks_aborts_run() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let key = run_key().table("T");
        let mut row = TableProgress::waiting(key.clone());
        row.status = TaskStatus::Running;
        row.chunks_total = 5;
        store.create_table_progress(&row).unwrap();
        // only 3 chunk rows exist
        let chunks: Vec<ChunkProgress> = (0..3)
            .map(|i| ChunkProgress {
                key: key.clone(),
                status: TaskStatus::Waiting,
                snapshot_scn: 1,
                projection: "ID".to_string(),
                predicate: format!("R{}", i),
                target_schema: "DST".to_string(),
                target_table: "T".to_string(),
                output_path: format!("/out/SRC/T/DST.T.{}.csv", i),
                info: None,
                error: None,
            })
            .collect();
        // parent claims 5 chunks but only 3 rows were written
        store.create_chunks_with_table(&chunks, &row, 10).unwrap();

        let planner = planner_with(
            store,
            probe_one_table("T", 0),
            FakeSplitter::with_ranges(&[]),
            settings(),
        );
        let err = planner.plan(&["T".to_string()], true).unwrap_err();
        match err {
            ExportError::ChunkInconsistency(msg) => assert!(msg.contains("T")),
            other => panic!("expected ChunkInconsistency, got {:?}", other),
        }
    }

    #[test]
    fn resume_disabled_purges_waiting_and_chunks_but_keeps_success() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let run = run_key();

        // table A: planned WAITING with chunks; table B: SUCCESS
        let planner = planner_with(
            store.clone(),
            probe_one_table("A", 100),
            FakeSplitter::with_ranges(&["R0", "R1"]),
            settings(),
        );
        planner.plan(&["A".to_string()], true).unwrap();
        let mut done = TableProgress::waiting(run.table("B"));
        done.status = TaskStatus::Success;
        done.chunks_total = 1;
        done.chunks_ok = 1;
        store.create_table_progress(&done).unwrap();

        let mut fresh = settings();
        fresh.resume_allowed = false;
        let planner2 = planner_with(
            store.clone(),
            probe_one_table("A", 100),
            FakeSplitter::with_ranges(&["R0", "R1"]),
            fresh,
        );
        let plan = planner2
            .plan(&["A".to_string(), "B".to_string()], true)
            .unwrap();

        // A was replanned from scratch, B kept its SUCCESS row and is skipped
        assert_eq!(plan.planned, vec!["A".to_string()]);
        assert!(plan.resumable.is_empty());
        let b = store.table_progress(&run.table("B")).unwrap().unwrap();
        assert_eq!(b.status, TaskStatus::Success);
    }

    #[test]
    fn success_row_for_dropped_table_is_reaped() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let run = run_key();
        for t in ["A", "B", "C"] {
            let mut row = TableProgress::waiting(run.table(t));
            row.status = TaskStatus::Success;
            store.create_table_progress(&row).unwrap();
        }

        let planner = planner_with(
            store.clone(),
            probe_one_table("A", 0),
            FakeSplitter::with_ranges(&[]),
            settings(),
        );
        let plan = planner
            .plan(&["A".to_string(), "B".to_string()], true)
            .unwrap();

        assert!(plan.planned.is_empty());
        assert!(store.table_progress(&run.table("C")).unwrap().is_none());
        assert!(store.table_progress(&run.table("A")).unwrap().is_some());
    }

    #[test]
    fn catalog_error_fails_only_that_table() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        // probe only knows table GOOD; BAD raises an oracle error
        let probe = probe_one_table("GOOD", 0);
        let planner = planner_with(store.clone(), probe, FakeSplitter::with_ranges(&[]), settings());

        let plan = planner
            .plan(&["GOOD".to_string(), "BAD".to_string()], true)
            .unwrap();
        assert_eq!(plan.planned, vec!["GOOD".to_string()]);
        assert_eq!(plan.planning_failures.len(), 1);
        assert_eq!(plan.planning_failures[0].0, "BAD");
        // the failed table stays WAITING without chunk rows
        let bad = store
            .table_progress(&run_key().table("BAD"))
            .unwrap()
            .unwrap();
        assert_eq!(bad.status, TaskStatus::Waiting);
        assert_eq!(store.count_chunks(&run_key().table("BAD")).unwrap(), 0);
    }

    #[test]
    fn empty_output_dir_fails_planning() {
        let store = Arc::new(SqliteMetaStore::in_memory().unwrap());
        let mut bad = settings();
        bad.output_dir = "  ".to_string();
        let planner = planner_with(
            store,
            probe_one_table("T", 0),
            FakeSplitter::with_ranges(&[]),
            bad,
        );
        assert!(matches!(
            planner.plan(&["T".to_string()], true),
            Err(ExportError::Config(_))
        ));
    }
}
