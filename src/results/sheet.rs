//! Result sheets
//!
//! CSV tables whose column set only grows. Appending keeps the existing
//! column order, adds unseen columns at the end, and leaves earlier rows
//! blank in those columns.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::ResultRow;
use crate::utils::fs::atomic_write;

/// In-memory CSV table: a header plus text rows of equal width
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a CSV file. Short rows are padded, long rows truncated.
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("Failed to read {}", path.display()))?;
            let mut row: Vec<String> = record
                .iter()
                .take(columns.len())
                .map(str::to_string)
                .collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Atomically write the table as CSV
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to encode CSV: {}", e.error()))?;
        atomic_write(path, &bytes)
    }

    /// Append any unseen columns, padding existing rows with blanks
    pub fn extend_columns<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if !self.columns.iter().any(|c| c == name) {
                self.columns.push(name.to_string());
            }
        }
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }

    /// Append a result row; its keys must already be columns
    pub fn push_row(&mut self, row: &ResultRow) {
        let cells = self
            .columns
            .iter()
            .map(|c| row.get(c).map(cell_text).unwrap_or_default())
            .collect();
        self.rows.push(cells);
    }

    /// Append rows of another table, reindexed onto this table's columns
    pub fn append_table(&mut self, other: &Table) {
        self.extend_columns(other.columns.iter().map(String::as_str));
        let positions: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.columns.iter().position(|o| o == c))
            .collect();

        for row in &other.rows {
            let cells = positions
                .iter()
                .map(|p| p.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                .collect();
            self.rows.push(cells);
        }
    }

    /// Cell at `row` for `column`, if both exist
    #[cfg(test)]
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Text form of a value for a CSV cell. Composite values are stored as JSON.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A per-worker result file that batches of rows are appended to
#[derive(Clone, Debug)]
pub struct ResultSheet {
    path: PathBuf,
}

impl ResultSheet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Merge `rows` into the file using the column-union policy.
    ///
    /// An empty batch writes nothing. An unreadable existing file is an error
    /// and is never overwritten.
    pub fn append(&self, rows: &[ResultRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut table = if self.exists() {
            Table::read(&self.path)?
        } else {
            Table::new()
        };

        for row in rows {
            table.extend_columns(row.keys().map(String::as_str));
        }
        for row in rows {
            table.push_row(row);
        }

        table
            .write(&self.path)
            .with_context(|| format!("Failed to write result file {}", self.path.display()))?;
        debug!(
            "Flushed {} row(s) to {} ({} total)",
            rows.len(),
            self.path.display(),
            table.len()
        );
        Ok(rows.len())
    }
}

/// Rows produced by one worker, with a watermark of what has been flushed
#[derive(Clone, Debug, Default)]
pub struct Accumulator {
    rows: Vec<ResultRow>,
    flushed: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    /// Rows not yet written to disk
    pub fn pending(&self) -> &[ResultRow] {
        &self.rows[self.flushed..]
    }

    pub fn mark_flushed(&mut self) {
        self.flushed = self.rows.len();
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.flushed = 0;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn row(value: serde_json::Value) -> ResultRow {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_column_union_is_ordered_and_backfilled() {
        let dir = tempdir().unwrap();
        let sheet = ResultSheet::new(dir.path().join("out.csv"));

        sheet.append(&[row(json!({"x": "1", "y": "2"}))]).unwrap();
        sheet.append(&[row(json!({"y": "3", "z": "4"}))]).unwrap();

        let table = Table::read(sheet.path()).unwrap();
        assert_eq!(table.columns, vec!["x", "y", "z"]);
        assert_eq!(table.rows[0], vec!["1", "2", ""]);
        assert_eq!(table.rows[1], vec!["", "3", "4"]);
    }

    #[test]
    fn test_composite_values_stored_as_json() {
        let dir = tempdir().unwrap();
        let sheet = ResultSheet::new(dir.path().join("out.csv"));

        sheet
            .append(&[row(json!({
                "targeting": {"age": [18, 35]},
                "tags": ["a", "b"],
                "count": 3,
                "missing": null
            }))])
            .unwrap();

        let table = Table::read(sheet.path()).unwrap();
        assert_eq!(table.cell(0, "targeting"), Some(r#"{"age":[18,35]}"#));
        assert_eq!(table.cell(0, "tags"), Some(r#"["a","b"]"#));
        assert_eq!(table.cell(0, "count"), Some("3"));
        assert_eq!(table.cell(0, "missing"), Some(""));
    }

    #[test]
    fn test_empty_batch_creates_nothing() {
        let dir = tempdir().unwrap();
        let sheet = ResultSheet::new(dir.path().join("out.csv"));
        assert_eq!(sheet.append(&[]).unwrap(), 0);
        assert!(!sheet.exists());
    }

    #[test]
    fn test_unreadable_existing_file_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::create_dir(&path).unwrap();

        let sheet = ResultSheet::new(&path);
        assert!(sheet.append(&[row(json!({"x": "1"}))]).is_err());
        assert!(path.is_dir());
    }

    #[test]
    fn test_append_table_reindexes() {
        let mut merged = Table::new();
        merged.append_table(&Table {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec!["1".into(), "2".into()]],
        });
        merged.append_table(&Table {
            columns: vec!["c".into(), "a".into()],
            rows: vec![vec!["3".into(), "4".into()]],
        });

        assert_eq!(merged.columns, vec!["a", "b", "c"]);
        assert_eq!(merged.rows[0], vec!["1", "2", ""]);
        assert_eq!(merged.rows[1], vec!["4", "", "3"]);
    }

    #[test]
    fn test_accumulator_watermark() {
        let mut acc = Accumulator::new();
        acc.push(row(json!({"a": 1})));
        assert_eq!(acc.pending().len(), 1);

        acc.mark_flushed();
        assert!(acc.pending().is_empty());

        acc.push(row(json!({"a": 2})));
        assert_eq!(acc.pending().len(), 1);
        assert_eq!(acc.len(), 2);

        acc.clear();
        assert!(acc.is_empty());
        assert!(acc.pending().is_empty());
    }
}
