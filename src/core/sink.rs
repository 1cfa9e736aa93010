//! Append-only delimited output with a schema fixed per query.
//!
//! The schema comes from the first non-empty node result of a query. Every
//! later batch is projected onto it: unknown keys are dropped, missing keys
//! are written empty. All non-numeric fields are quoted.

use crate::core::error::OutputError;
use csv::{QuoteStyle, WriterBuilder};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// One record returned by a node: field name to value, in response order.
pub type Row = Map<String, Value>;

/// Ordered output columns for one query's file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSchema {
    columns: Vec<String>,
}

impl OutputSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Columns taken from the keys of the first row of `rows`.
    pub fn from_rows(rows: &[Row]) -> Self {
        Self {
            columns: rows
                .first()
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values of `row` in schema order; absent fields become empty.
    pub fn project(&self, row: &Row) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| row.get(column).map(render_value).unwrap_or_default())
            .collect()
    }
}

/// Text form of a JSON value as written to the output file.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Handle on one query's output file.
#[derive(Debug, Clone)]
pub struct OutputSink {
    path: PathBuf,
    delimiter: u8,
}

impl OutputSink {
    /// Create the parent folder if needed and truncate/create the file.
    pub fn open(path: &Path, delimiter: u8) -> Result<Self, OutputError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| OutputError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        File::create(path).map_err(|source| OutputError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            delimiter,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one node's rows, preceded by the header when `write_header`.
    /// Returns the number of records written.
    pub fn write(
        &self,
        rows: &[Row],
        schema: &OutputSchema,
        write_header: bool,
    ) -> Result<usize, OutputError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| OutputError::Open {
                path: self.path.clone(),
                source,
            })?;
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::NonNumeric)
            .from_writer(file);

        let write_err = |source| OutputError::Write {
            path: self.path.clone(),
            source,
        };
        if write_header {
            writer.write_record(schema.columns()).map_err(write_err)?;
        }
        for row in rows {
            writer.write_record(schema.project(row)).map_err(write_err)?;
        }
        writer.flush().map_err(|source| OutputError::Flush {
            path: self.path.clone(),
            source,
        })?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn schema_follows_first_row_key_order() {
        let rows = vec![row(json!({"b": 1, "a": 2})), row(json!({"c": 3}))];
        assert_eq!(OutputSchema::from_rows(&rows).columns(), &["b", "a"]);
        assert!(OutputSchema::from_rows(&[]).columns().is_empty());
    }

    #[test]
    fn projection_drops_unknown_and_blanks_missing() {
        let schema = OutputSchema::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(schema.project(&row(json!({"a": 3, "c": 4}))), vec!["3", ""]);
    }

    #[test]
    fn render_scalars() {
        assert_eq!(render_value(&json!(null)), "");
        assert_eq!(render_value(&json!("x y")), "x y");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(1.5)), "1.5");
        assert_eq!(render_value(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn quotes_non_numeric_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = OutputSink::open(&path, b',').unwrap();
        let schema = OutputSchema::new(vec!["name".to_string(), "count".to_string()]);
        sink.write(&[row(json!({"name": "pc-1", "count": 12}))], &schema, true)
            .unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "\"name\",\"count\"\n\"pc-1\",12\n");
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let err = OutputSink::open(&blocker.join("sub").join("out.csv"), b',').unwrap_err();
        assert!(matches!(err, OutputError::CreateDir { .. }));
    }
}
