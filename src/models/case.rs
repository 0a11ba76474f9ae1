//! Case models
//!
//! A case is one row of the input table. Its `index` is assigned from the
//! row's position in the unfiltered table and never renumbered.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered key/value mapping used for case fields and result rows
pub type Fields = Map<String, Value>;

/// One row contributed to the result file by an operation
pub type ResultRow = Map<String, Value>;

/// Columns interpreted by the harness itself; never passed to operations
pub const RESERVED_FIELDS: &[&str] = &["index", "operation", "clear_context", "is_skip"];

/// Prefix of assertion columns; never passed to operations
pub const EXPECTED_PREFIX: &str = "expected_";

/// Check whether a column is consumed by the harness rather than an operation
pub fn is_reserved(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name) || name.starts_with(EXPECTED_PREFIX)
}

/// Parse a spreadsheet-style boolean cell.
///
/// Blank means false. Explicit negatives (`0`, `false`, `no`, `n`, `off`) are
/// false; any other marker counts as set.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    !matches!(
        value.to_lowercase().as_str(),
        "0" | "0.0" | "false" | "no" | "n" | "off" | "nan" | "none" | "null"
    )
}

/// A single test case
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Stable row position in the unfiltered table
    pub index: usize,

    /// Operation name, looked up in the registry
    pub operation: String,

    /// Reset accumulated output and conversation state after this case
    #[serde(default)]
    pub clear_context: bool,

    /// Skip marker; skipped rows never reach a runner
    #[serde(default)]
    pub is_skip: bool,

    /// Operation-specific columns (blank cells omitted)
    #[serde(default)]
    pub fields: Fields,
}

impl Case {
    pub fn new(index: usize, operation: impl Into<String>) -> Self {
        Self {
            index,
            operation: operation.into(),
            clear_context: false,
            is_skip: false,
            fields: Fields::new(),
        }
    }

    #[cfg(test)]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[cfg(test)]
    pub fn with_clear_context(mut self, clear: bool) -> Self {
        self.clear_context = clear;
        self
    }

    #[cfg(test)]
    pub fn with_skip(mut self, skip: bool) -> Self {
        self.is_skip = skip;
        self
    }

    /// Arguments handed to the operation: every non-reserved field
    pub fn args(&self) -> CaseArgs {
        CaseArgs(
            self.fields
                .iter()
                .filter(|(k, _)| !is_reserved(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Assertion columns (`expected_*`) carried alongside the case
    #[cfg(test)]
    pub fn expectations(&self) -> Fields {
        self.fields
            .iter()
            .filter(|(k, _)| k.starts_with(EXPECTED_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Named arguments passed to an operation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaseArgs(Fields);

impl CaseArgs {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a non-blank string argument
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Get a string argument, falling back to `default` when blank or absent
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    /// Get a boolean-like argument
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => parse_flag(s),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    /// First required field that is absent or blank
    pub fn first_missing<'a>(&self, required: &[&'a str]) -> Option<&'a str> {
        required.iter().copied().find(|key| match self.get(key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The ordered case list published to every worker of a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseSet {
    /// Run this set was loaded for
    pub run_id: String,

    /// Cases remaining after skip filtering, before the resume filter
    pub total_count: usize,

    /// Number of rows in the unfiltered table; the index space is `[0, index_span)`
    pub index_span: usize,

    /// Resume index applied when the set was loaded (0 when not resuming)
    pub resumed_from: usize,

    /// Cases still to run, ascending by index
    pub cases: Vec<Case>,
}

impl CaseSet {
    /// A set with nothing to do
    pub fn empty(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            total_count: 0,
            index_span: 0,
            resumed_from: 0,
            cases: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }
}
