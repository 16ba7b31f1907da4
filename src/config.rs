//! # Configuration Module
//!
//! Parses the YAML/JSON configuration file and the command-line overrides,
//! and validates everything the engine depends on (a missing `output_dir`
//! or a zero concurrency must never reach the planner).

use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;

use crate::domain::errors::{ExportError, Result};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Source database connection details.
    pub database: DatabaseConfig,
    /// Target-side naming (used in artifact file names).
    pub target: TargetConfig,
    /// Metadata (checkpoint) store location.
    #[serde(default)]
    pub meta: MetaConfig,
    /// Export behavior settings.
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub username: String,
    /// Falls back to the ORACLE_PASSWORD environment variable when absent.
    pub password: Option<String>,
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    pub service: String,
    /// Source schema to drain.
    pub schema: String,
}

impl DatabaseConfig {
    /// Easy Connect string, `host:port/service`.
    pub fn connection_string(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.service)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    /// Target schema name stamped into artifact file names.
    pub schema: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetaConfig {
    /// Path of the SQLite checkpoint database.
    #[serde(default = "defaults::meta_path")]
    pub path: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            path: defaults::meta_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    /// Directory the CSV artifacts are laid out under.
    pub output_dir: String,
    /// When false, every checkpoint for this run's key is cleared and the
    /// schema is replanned from scratch (SUCCESS tables are kept).
    #[serde(default = "defaults::resume_allowed")]
    pub resume_allowed: bool,
    /// Tables migrated concurrently.
    #[serde(default = "defaults::table_concurrency")]
    pub table_concurrency: usize,
    /// Chunks read concurrently within one table.
    #[serde(default = "defaults::chunk_concurrency")]
    pub chunk_concurrency: usize,
    /// Tables planned concurrently.
    #[serde(default = "defaults::planning_concurrency")]
    pub planning_concurrency: usize,
    /// Target rows per chunk, handed to the source-side splitter.
    #[serde(default = "defaults::chunk_rows")]
    pub chunk_rows: u64,
    /// Checkpoint rows inserted per batch.
    #[serde(default = "defaults::insert_batch")]
    pub insert_batch: usize,
    /// Rows fetched per round-trip on chunk cursors.
    #[serde(default = "defaults::prefetch_rows")]
    pub prefetch_rows: u32,
    /// CSV field delimiter, single ASCII character.
    #[serde(default = "defaults::delimiter")]
    pub delimiter: String,
    #[serde(default = "defaults::write_header")]
    pub write_header: bool,
    /// Textual form of SQL NULL in the artifacts.
    #[serde(default)]
    pub null_as: String,
    /// Opaque labels keyed into the metadata store.
    #[serde(default = "defaults::source_db_id")]
    pub source_db_id: String,
    #[serde(default = "defaults::target_db_id")]
    pub target_db_id: String,
    #[serde(default = "defaults::task_mode")]
    pub task_mode: String,
    /// Include list; absent means every table in the schema.
    pub tables: Option<Vec<String>>,
    pub exclude_tables: Option<Vec<String>>,
}

mod defaults {
    pub fn port() -> u16 {
        1521
    }
    pub fn meta_path() -> String {
        "migration_meta.db".to_string()
    }
    pub fn resume_allowed() -> bool {
        true
    }
    pub fn table_concurrency() -> usize {
        4
    }
    pub fn chunk_concurrency() -> usize {
        4
    }
    pub fn planning_concurrency() -> usize {
        4
    }
    pub fn chunk_rows() -> u64 {
        100_000
    }
    pub fn insert_batch() -> usize {
        500
    }
    pub fn prefetch_rows() -> u32 {
        5000
    }
    pub fn delimiter() -> String {
        ",".to_string()
    }
    pub fn write_header() -> bool {
        true
    }
    pub fn source_db_id() -> String {
        "ORACLE".to_string()
    }
    pub fn target_db_id() -> String {
        "MYSQL".to_string()
    }
    pub fn task_mode() -> String {
        "CSV".to_string()
    }
}

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: String,

    // Overrides for ad-hoc runs
    #[arg(long)]
    pub schema: Option<String>,
    #[arg(short, long)]
    pub output: Option<String>,
    /// Disable checkpoint resume for this run
    #[arg(long)]
    pub no_resume: bool,
    /// Comma-separated include list of tables
    #[arg(long)]
    pub tables: Option<String>,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;

        let config: AppConfig = if path.ends_with(".json") {
            serde_json::from_str(&contents)
                .map_err(|e| ExportError::Config(format!("{}: {}", path, e)))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| ExportError::Config(format!("{}: {}", path, e)))?
        };
        Ok(config)
    }

    pub fn merge_cli(&mut self, args: &CliArgs) {
        if let Some(s) = &args.schema {
            self.database.schema = s.clone();
        }
        if let Some(o) = &args.output {
            self.export.output_dir = o.clone();
        }
        if args.no_resume {
            self.export.resume_allowed = false;
        }
        if let Some(ts) = &args.tables {
            self.export.tables = Some(ts.split(',').map(|t| t.trim().to_string()).collect());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.export.output_dir.trim().is_empty() {
            return Err(ExportError::Config(
                "export.output_dir must not be empty".to_string(),
            ));
        }
        for (name, value) in [
            ("export.table_concurrency", self.export.table_concurrency),
            ("export.chunk_concurrency", self.export.chunk_concurrency),
            (
                "export.planning_concurrency",
                self.export.planning_concurrency,
            ),
            ("export.insert_batch", self.export.insert_batch),
        ] {
            if value == 0 {
                return Err(ExportError::Config(format!("{} must be > 0", name)));
            }
        }
        if self.export.chunk_rows == 0 {
            return Err(ExportError::Config(
                "export.chunk_rows must be > 0".to_string(),
            ));
        }
        if self.export.prefetch_rows == 0 {
            return Err(ExportError::Config(
                "export.prefetch_rows must be > 0".to_string(),
            ));
        }
        if self.export.delimiter.len() != 1 || !self.export.delimiter.is_ascii() {
            return Err(ExportError::Config(
                "export.delimiter must be a single ASCII character".to_string(),
            ));
        }
        if self.meta.path.trim().is_empty() {
            return Err(ExportError::Config(
                "meta.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.export.delimiter.as_bytes()[0]
    }
}
