//! Case table reader
//!
//! Reads the input CSV into cases. Indices come from row position, so an
//! authored `index` column is ignored.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

use crate::models::{parse_flag, Case};

/// Read every row of the case table, skip-marked rows included
pub fn read_cases(path: &Path) -> Result<Vec<Case>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .with_context(|| format!("Failed to open case table: {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();

    if !headers.iter().any(|h| h == "operation") {
        bail!("Case table {} has no 'operation' column", path.display());
    }

    let mut cases = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Failed to read row {} of {}", index, path.display()))?;

        let mut case = Case::new(index, "");
        for (name, cell) in headers.iter().zip(record.iter()) {
            let cell = cell.trim();
            match name {
                "index" => {}
                "operation" => case.operation = cell.to_string(),
                "clear_context" => case.clear_context = parse_flag(cell),
                "is_skip" => case.is_skip = parse_flag(cell),
                _ if cell.is_empty() => {}
                _ => {
                    case.fields
                        .insert(name.to_string(), Value::String(cell.to_string()));
                }
            }
        }
        cases.push(case);
    }

    Ok(cases)
}
