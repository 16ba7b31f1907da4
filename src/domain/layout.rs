//! Deterministic artifact path layout.
//!
//! Every chunk writes exactly one file at
//! `<output_dir>/<SOURCE_SCHEMA>/<SOURCE_TABLE>/<TARGET_SCHEMA>.<TARGET_TABLE>.<INDEX>.csv`
//! with all identifiers upper-cased. Chunk indices are zero-based and stable
//! within a plan; a whole-table chunk is index 0.

use std::path::{Path, PathBuf};

/// Computes the CSV artifact path for one chunk of one table.
pub fn chunk_output_path(
    output_dir: &str,
    source_schema: &str,
    source_table: &str,
    target_schema: &str,
    target_table: &str,
    chunk_index: usize,
) -> PathBuf {
    Path::new(output_dir)
        .join(source_schema.to_uppercase())
        .join(source_table.to_uppercase())
        .join(format!(
            "{}.{}.{}.csv",
            target_schema.to_uppercase(),
            target_table.to_uppercase(),
            chunk_index
        ))
}
