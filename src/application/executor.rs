//! # Executor
//!
//! Two-level fan-out: an outer pool of tables, and one inner pool of
//! chunks per in-flight table. Resumable tables run before freshly planned
//! ones, because their chunks may already be partially done.
//!
//! Error policy: anything that goes wrong inside one chunk (cursor open,
//! column resolution, writer) is recorded on that chunk's checkpoint row
//! and never leaves the chunk task. Only metadata gateway errors and
//! cancellation propagate out of the pools.
//!
//! Chunk rows stay WAITING in the store while they execute; RUNNING is an
//! in-memory notion of dispatch. A kill mid-chunk therefore leaves the row
//! eligible for the next resume.

use crate::application::planner::ExecutionPlan;
use crate::domain::cancel::CancelToken;
use crate::domain::entities::{ChunkProgress, RunKey, TaskStatus};
use crate::domain::errors::{ExportError, Result};
use crate::ports::meta_port::MetaGateway;
use crate::ports::source_port::SourceReader;
use crate::ports::writer_port::{RecordWriter, WriteRequest};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Per-table accounting returned to the orchestrator.
#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub table: String,
    pub status: TaskStatus,
    pub chunks_ok: u64,
    pub chunks_failed: u64,
    pub duration_secs: f64,
}

pub struct Executor {
    gateway: Arc<dyn MetaGateway>,
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn RecordWriter>,
    run: RunKey,
    /// Source database character set, passed through to the writer.
    charset: String,
    table_concurrency: usize,
    chunk_concurrency: usize,
    cancel: CancelToken,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn MetaGateway>,
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn RecordWriter>,
        run: RunKey,
        charset: String,
        table_concurrency: usize,
        chunk_concurrency: usize,
        cancel: CancelToken,
    ) -> Self {
        Self {
            gateway,
            reader,
            writer,
            run,
            charset,
            table_concurrency,
            chunk_concurrency,
            cancel,
        }
    }

    /// Drains the plan: resumable tables first, then the freshly planned
    /// batch.
    pub fn run(&self, plan: &ExecutionPlan) -> Result<Vec<TableOutcome>> {
        let mut outcomes = self.run_batch(&plan.resumable)?;
        outcomes.extend(self.run_batch(&plan.planned)?);
        Ok(outcomes)
    }

    fn run_batch(&self, tables: &[String]) -> Result<Vec<TableOutcome>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.table_concurrency.max(1))
            .build()
            .map_err(|e| ExportError::Config(format!("table pool: {}", e)))?;
        let results: Vec<Result<TableOutcome>> =
            pool.install(|| tables.par_iter().map(|t| self.run_table(t)).collect());
        results.into_iter().collect()
    }

    /// Executes every eligible chunk of one table, then commits the table's
    /// terminal state from the authoritative store counters.
    fn run_table(&self, table: &str) -> Result<TableOutcome> {
        let start = Instant::now();
        if self.cancel.is_canceled() {
            return Err(ExportError::Canceled);
        }
        let key = self.run.table(table);
        self.gateway
            .update_table_status(&key, TaskStatus::Running)?;

        // WAITING chunks are fresh work; FAILED chunks get exactly one
        // retry per run.
        let eligible = self
            .gateway
            .chunks_with_status(&key, &[TaskStatus::Waiting, TaskStatus::Failed])?;
        info!("table {} starting, {} chunks eligible", key, eligible.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.chunk_concurrency.max(1))
            .build()
            .map_err(|e| ExportError::Config(format!("chunk pool: {}", e)))?;
        let chunk_results: Vec<Result<()>> = pool.install(|| {
            eligible
                .into_par_iter()
                .map(|chunk| self.run_chunk(chunk))
                .collect()
        });
        for res in chunk_results {
            res?;
        }

        let failed = self
            .gateway
            .count_chunks_with_status(&key, TaskStatus::Failed)?;
        let outcome = if failed == 0 {
            let ok = self.gateway.finish_table_success(&key)?;
            info!(
                "table {} finished, {} chunks in {:.1}s",
                key,
                ok,
                start.elapsed().as_secs_f64()
            );
            TableOutcome {
                table: table.to_string(),
                status: TaskStatus::Success,
                chunks_ok: ok,
                chunks_failed: 0,
                duration_secs: start.elapsed().as_secs_f64(),
            }
        } else {
            let (ok, failed) = self.gateway.finish_table_failed(&key)?;
            warn!(
                "table {} has {} failed chunks, keeping checkpoint rows for resume",
                key, failed
            );
            TableOutcome {
                table: table.to_string(),
                status: TaskStatus::Failed,
                chunks_ok: ok,
                chunks_failed: failed,
                duration_secs: start.elapsed().as_secs_f64(),
            }
        };
        Ok(outcome)
    }

    /// One chunk: query → stream → write → record terminal status. Never
    /// returns a chunk-level error; only metadata errors and cancellation
    /// escape.
    fn run_chunk(&self, chunk: ChunkProgress) -> Result<()> {
        if self.cancel.is_canceled() {
            // leave the row as-is; the next resume re-executes it
            return Err(ExportError::Canceled);
        }
        let key = chunk.key.clone();
        let query = chunk.query();
        debug!("chunk {} dispatched", chunk.describe());

        let mut rows_written = 0u64;
        let charset = self.charset.as_str();
        let writer = Arc::clone(&self.writer);
        let cancel = &self.cancel;
        let stream_res = self
            .reader
            .stream(&query, chunk.snapshot_scn, cancel, &mut |cursor| {
                let columns = cursor.columns().to_vec();
                let req = WriteRequest {
                    schema: &key.run.schema,
                    table: &key.table,
                    charset,
                    query: &query,
                    output_path: &chunk.output_path,
                    columns: &columns,
                };
                rows_written = writer.write_chunk(&req, cursor, cancel)?;
                Ok(())
            });

        match stream_res {
            Ok(()) => {
                self.gateway.update_chunk_status(
                    &key,
                    &chunk.predicate,
                    TaskStatus::Success,
                    None,
                    None,
                )?;
                debug!("chunk {} wrote {} rows", chunk.describe(), rows_written);
            }
            // a canceled chunk is not a failure, its row stays as-is
            Err(ExportError::Canceled) => return Err(ExportError::Canceled),
            Err(e @ ExportError::Metadata(_)) => return Err(e),
            Err(e) => {
                warn!("chunk {} failed: {}", chunk.describe(), e);
                self.gateway
                    .update_chunk_status(
                        &key,
                        &chunk.predicate,
                        TaskStatus::Failed,
                        Some(&chunk.describe()),
                        Some(&e.to_string()),
                    )
                    .map_err(|g| {
                        ExportError::Metadata(format!(
                            "recording failure for chunk {}: {}",
                            chunk.describe(),
                            g
                        ))
                    })?;
            }
        }
        Ok(())
    }
}
