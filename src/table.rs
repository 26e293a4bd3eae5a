//! Tab-separated table I/O.
//!
//! All intermediate artifacts are TSV files with a header row. Cells are
//! read as strings; the literal placeholders `nan`/`NaN` are normalized to
//! empty strings on read so downstream joins and emptiness checks behave.

use crate::variant::Row;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

/// An in-memory tabular artifact: ordered headers plus one `Row` per line.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// An empty table with no headers and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Read a TSV file into a `Table`.
///
/// A zero-byte file yields an empty table. Missing files are an error; the
/// caller decides whether that is fatal.
pub fn read_tsv(path: &Path) -> Result<Table> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("cannot stat input table {}", path.display()))?;
    if metadata.len() == 0 {
        return Ok(Table::empty());
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open input table {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("reading TSV header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("reading TSV record")?;
        let mut row = Row::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            let cell = normalize_cell(cell);
            row.insert(header.clone(), Value::String(cell));
        }
        rows.push(row);
    }

    Ok(Table { headers, rows })
}

/// Write a `Table` to a TSV file. An empty table produces an empty file.
pub fn write_tsv(path: &Path, table: &Table) -> Result<()> {
    if table.headers.is_empty() {
        std::fs::write(path, "")
            .with_context(|| format!("writing empty table {}", path.display()))?;
        return Ok(());
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("cannot create output table {}", path.display()))?;

    writer.write_record(&table.headers)?;
    for row in &table.rows {
        let record: Vec<String> = table
            .headers
            .iter()
            .map(|h| row.get(h).map(cell_to_string).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Count data rows in a file, excluding the header line.
///
/// An unreadable file counts as zero rows rather than an error; the estimate
/// just degrades to the floor.
pub fn count_data_rows(path: &Path) -> usize {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.lines().count().saturating_sub(1),
        Err(_) => 0,
    }
}

/// Render a JSON cell value for TSV output.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn normalize_cell(cell: &str) -> String {
    let trimmed = cell.trim();
    if trimmed == "nan" || trimmed == "NaN" {
        String::new()
    } else {
        trimmed.to_string()
    }
}
