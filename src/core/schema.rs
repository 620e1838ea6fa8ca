//! Purpose: Define the fixed tabular contract every partition is parsed against.
//! Exports: `Schema`, `Row`, `BadRowPolicy`, `TableOptions`.
//! Invariants: A schema is non-empty and its arity never changes after construction.
//! Invariants: A `Row` always has exactly `schema.arity()` fields; malformed records never become rows.
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

/// Ordered, fixed-arity sequence of column names. Columns are opaque text;
/// type coercion is a downstream concern and is deliberately not performed
/// during the scan.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    pub fn new(columns: Vec<String>) -> Result<Self, Error> {
        if columns.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("schema must name at least one column"));
        }
        if columns.iter().any(|name| name.is_empty()) {
            return Err(Error::new(ErrorKind::Usage).with_message("schema column names must be non-empty"));
        }
        Ok(Self { columns })
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// One parsed record. Field count always equals the schema arity.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub fields: Vec<String>,
}

/// What to do with a record whose field count does not match the schema.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BadRowPolicy {
    /// Count the record and continue.
    Skip,
    /// Abort the read, reporting rows parsed so far.
    Fail,
}

#[derive(Copy, Clone, Debug)]
pub struct TableOptions {
    pub target_partition_bytes: u64,
    pub delimiter: u8,
    /// True when row 0 of the file is a header record, not data.
    pub has_header: bool,
    pub bad_rows: BadRowPolicy,
}

impl TableOptions {
    pub fn new(target_partition_bytes: u64) -> Self {
        Self {
            target_partition_bytes,
            delimiter: b',',
            has_header: false,
            bad_rows: BadRowPolicy::Skip,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_bad_rows(mut self, bad_rows: BadRowPolicy) -> Self {
        self.bad_rows = bad_rows;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{BadRowPolicy, Schema, TableOptions};
    use crate::core::error::ErrorKind;

    #[test]
    fn schema_rejects_empty_column_list() {
        let err = Schema::new(Vec::new()).expect_err("empty schema");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn schema_rejects_unnamed_column() {
        let err = Schema::new(vec!["a".to_string(), String::new()]).expect_err("unnamed column");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn schema_reports_arity_in_order() {
        let schema = Schema::new(vec!["user_id".to_string(), "visit_city".to_string()]).expect("schema");
        assert_eq!(schema.arity(), 2);
        assert_eq!(schema.columns(), ["user_id", "visit_city"]);
    }

    #[test]
    fn options_defaults_match_ingestion_posture() {
        let options = TableOptions::new(64 * 1024 * 1024);
        assert_eq!(options.delimiter, b',');
        assert!(!options.has_header);
        assert_eq!(options.bad_rows, BadRowPolicy::Skip);
    }
}
