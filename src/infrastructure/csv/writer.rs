//! CSV record writer.
//!
//! Drains a chunk cursor into one artifact file. The file is written to a
//! `.part` sibling first and renamed into place on success, so a partially
//! written chunk never masquerades as a finished artifact.

use crate::domain::cancel::CancelToken;
use crate::domain::errors::{ExportError, Result};
use crate::ports::source_port::RowCursor;
use crate::ports::writer_port::{RecordWriter, WriteRequest};
use csv::{QuoteStyle, WriterBuilder};
use log::debug;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const WRITE_BUFFER_BYTES: usize = 128 * 1024;

/// `RecordWriter` producing plain CSV files.
pub struct CsvChunkWriter {
    delimiter: u8,
    write_header: bool,
    /// Textual form of SQL NULL in the output.
    null_as: String,
}

impl CsvChunkWriter {
    pub fn new(delimiter: u8, write_header: bool, null_as: String) -> Self {
        Self {
            delimiter,
            write_header,
            null_as,
        }
    }

    fn part_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".part");
        PathBuf::from(name)
    }

    fn write_to(
        &self,
        req: &WriteRequest<'_>,
        part: &Path,
        cursor: &mut dyn RowCursor,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let file = File::create(part)?;
        let buf = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
        let mut wtr = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::Necessary)
            .from_writer(buf);

        if self.write_header {
            wtr.write_record(req.columns)
                .map_err(|e| ExportError::Writer(e.to_string()))?;
        }

        let mut rows = 0u64;
        while let Some(row) = cursor.next_row() {
            if cancel.is_canceled() {
                return Err(ExportError::Canceled);
            }
            let row = row?;
            let record: Vec<&str> = row
                .iter()
                .map(|field| field.as_deref().unwrap_or(self.null_as.as_str()))
                .collect();
            wtr.write_record(&record)
                .map_err(|e| ExportError::Writer(e.to_string()))?;
            rows += 1;
        }

        wtr.flush().map_err(|e| ExportError::Writer(e.to_string()))?;
        drop(wtr);
        Ok(rows)
    }
}

impl RecordWriter for CsvChunkWriter {
    fn write_chunk(
        &self,
        req: &WriteRequest<'_>,
        cursor: &mut dyn RowCursor,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let path = Path::new(req.output_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let part = Self::part_path(path);

        // a canceled or failed write leaves neither artifact nor partial
        let rows = match self.write_to(req, &part, cursor, cancel) {
            Ok(rows) => rows,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };
        fs::rename(&part, path)?;
        debug!(
            "{}.{} ({}) wrote {} rows to {}",
            req.schema, req.table, req.charset, rows, req.output_path
        );
        Ok(rows)
    }
}
