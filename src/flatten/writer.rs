use crate::types::Row;
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;

/// Writes flat rows as JSON Lines, one object per row
pub struct RowWriter<W: Write> {
    writer: W,
    with_metadata: bool,
    rows_written: u64,
}

impl<W: Write> RowWriter<W> {
    pub fn new(writer: W) -> Self {
        RowWriter {
            writer,
            with_metadata: false,
            rows_written: 0,
        }
    }

    /// Add `_document` and `_row` columns locating each row in its source
    pub fn with_metadata(mut self, enabled: bool) -> Self {
        self.with_metadata = enabled;
        self
    }

    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let serialized = if self.with_metadata {
            let mut data = row.data.clone();
            data.insert("_document".to_string(), Value::from(row.document));
            data.insert("_row".to_string(), Value::from(row.ordinal));
            serde_json::to_string(&data)
        } else {
            serde_json::to_string(&row.data)
        };
        let line = serialized.context("Failed to serialize row")?;

        writeln!(self.writer, "{}", line).context("Failed to write row")?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn write_rows(&mut self, rows: &[Row]) -> Result<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
