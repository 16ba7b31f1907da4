//! Core error definitions for the CSV migration engine.
//!
//! This module provides a centralized `ExportError` enum and a `Result` type
//! used throughout the application. The variants mirror the failure policy:
//! per-chunk errors (`Oracle`, `Writer`) are recorded in the metadata store
//! and never abort the run, while `Metadata` errors always propagate because
//! checkpoint state is uncertain once the store misbehaves.

use thiserror::Error;

/// Error types encountered during planning and chunk execution.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The source database is older than the engine supports.
    #[error("source capability too old: {0}")]
    CapabilityTooOld(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Failed tables from a prior run block planning until the operator
    /// repairs or resets the metadata.
    #[error("prior failure present: {0}")]
    PriorFailure(String),

    /// A RUNNING table whose chunk rows no longer match `chunks_total`.
    #[error("chunk checkpoint inconsistent: {0}")]
    ChunkInconsistency(String),

    #[error("metadata store error: {0}")]
    Metadata(String),

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("writer error: {0}")]
    Writer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("run canceled")]
    Canceled,
}

impl From<oracle::Error> for ExportError {
    fn from(e: oracle::Error) -> Self {
        ExportError::Oracle(e.to_string())
    }
}

impl From<rusqlite::Error> for ExportError {
    fn from(e: rusqlite::Error) -> Self {
        ExportError::Metadata(e.to_string())
    }
}

impl From<r2d2::Error> for ExportError {
    fn from(e: r2d2::Error) -> Self {
        ExportError::Oracle(format!("connection pool: {}", e))
    }
}

/// A specialized Result type for the migration engine.
pub type Result<T> = std::result::Result<T, ExportError>;
