//! # Command Results and Structured Data
//!
//! `CommandResult` is the value every execution produces (spec §4.1, §7):
//! raw stdout/stderr alongside a parsed, structured view in the engine's
//! canonical `LIST` format. `DataFormat`/`DataFormatConverter` implement
//! spec §4.6's on-demand conversion between that canonical form and the
//! richer shapes (`TABLE`, `JSON`, `DATAFRAME`, `NDARRAY`) some callers
//! want instead.

use crate::context::ContextSnapshot;
use crate::history::{truncate_excerpt, ExecutionHistory, ExecutionStep};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One parsed output row: an ordered bag of named fields. This is the
/// engine's canonical representation — every parser produces `Vec<Row>`,
/// and every other `DataFormat` is derived from it.
pub type Row = HashMap<String, Value>;

/// Row/field counts taken from a `Vec<Row>`, never the rows themselves
/// (spec §3: `ExecutionStep.structured_summary` is "counts only").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSummary {
    /// Number of rows.
    pub row_count: usize,
    /// Number of fields in the first row, 0 if there are no rows.
    pub field_count: usize,
}

impl StructuredSummary {
    /// Summarize `rows`.
    pub fn from_rows(rows: &[Row]) -> Self {
        Self {
            row_count: rows.len(),
            field_count: rows.first().map(HashMap::len).unwrap_or(0),
        }
    }
}

/// Shapes structured command output can be converted into (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    /// The canonical `Vec<Row>` representation. Always available.
    List,
    /// A column-oriented table: header row plus string cells.
    Table,
    /// A single `serde_json::Value` array of objects.
    Json,
    /// A `polars::DataFrame`, gated behind the `dataframe` feature.
    DataFrame,
    /// An `ndarray::Array2<f64>`, gated behind the `ndarray-format`
    /// feature; only numeric-only rows can convert losslessly.
    NdArray,
}

impl DataFormat {
    /// Human-readable name used in error messages and CLI flags.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Table => "table",
            Self::Json => "json",
            Self::DataFrame => "dataframe",
            Self::NdArray => "ndarray",
        }
    }
}

/// The data produced by converting a `Vec<Row>` into another `DataFormat`
/// (spec §4.6). `List` never needs conversion, so it isn't a variant here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConvertedData {
    /// Header row plus stringified cells, column order from first row seen.
    Table {
        /// Column names, in first-seen order.
        columns: Vec<String>,
        /// Row-major stringified cells.
        rows: Vec<Vec<String>>,
    },
    /// Rows re-expressed as a single JSON array value.
    Json(Value),
}

/// Converts the canonical `Vec<Row>` into other `DataFormat`s (spec §4.6).
///
/// `polars`/`ndarray` conversions are not implemented here: with neither
/// feature enabled there is no collaborator to hand the data to, so those
/// paths return `MancerError::ConversionUnavailable` from `result.rs`
/// callers rather than living inside this converter.
pub struct DataFormatConverter;

impl DataFormatConverter {
    /// Convert `rows` into `target`. Returns `None` for `List` (already in
    /// canonical form — callers should special-case that branch before
    /// calling this) and for `DataFrame`/`NdArray` (handled by the
    /// feature-gated collaborators instead).
    pub fn convert(rows: &[Row], target: DataFormat) -> Option<ConvertedData> {
        match target {
            DataFormat::Table => Some(Self::to_table(rows)),
            DataFormat::Json => Some(Self::to_json(rows)),
            DataFormat::List | DataFormat::DataFrame | DataFormat::NdArray => None,
        }
    }

    fn to_table(rows: &[Row]) -> ConvertedData {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let table_rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| {
                        row.get(col)
                            .map(render_cell)
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        ConvertedData::Table {
            columns,
            rows: table_rows,
        }
    }

    fn to_json(rows: &[Row]) -> ConvertedData {
        let values: Vec<Value> = rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, Value> =
                    row.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Value::Object(map)
            })
            .collect();
        ConvertedData::Json(Value::Array(values))
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pull a single field out of every row, dropping rows where it's absent
/// — used by `CommandChain::pipe` to project one column into the next
/// command's stdin (spec §4.4).
pub fn extract_field(rows: &[Row], field: &str) -> Vec<Value> {
    rows.iter().filter_map(|row| row.get(field).cloned()).collect()
}

/// The outcome of one `Command` execution (spec §7).
///
/// `success` already accounts for a command's own `success` override
/// (e.g. grep's "exit 1 means no match, not failure") — it is not simply
/// `exit_code == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether this execution counts as successful.
    pub success: bool,
    /// Raw standard output.
    pub stdout: String,
    /// Raw standard error.
    pub stderr: String,
    /// Exit code reported by the child process (or a sentinel for
    /// cancellation/timeout; see `exit_codes.rs`).
    pub exit_code: i32,
    /// Parsed structured rows in the canonical `LIST` form, empty if no
    /// parser applied or parsing failed (`ParserFailed` never fails the
    /// command — spec §4.3 step 9).
    pub data: Vec<Row>,
    /// The `DataFormat` `structured_output` is rendered in. Always `List`
    /// until `to_format` produces a result in a different format (spec
    /// §4.6).
    pub data_format: DataFormat,
    /// The converted structured view when `data_format != List`; `None`
    /// for a result still in canonical `LIST` form.
    pub structured_output: Option<ConvertedData>,
    /// Free-form bookkeeping: `error_kind`, `tool_version`, `parser_name`,
    /// `cache_hit`, and similar diagnostic tags.
    pub metadata: HashMap<String, String>,
    /// This result's own execution history (spec §3: "CommandResult owns
    /// its ExecutionHistory"). Contains at least one `ExecutionStep`
    /// describing this result once it's been through `Orchestrator`.
    pub history: ExecutionHistory,
}

impl CommandResult {
    /// Construct a result with no structured data, metadata, or history —
    /// the shape most builtin commands start from before a parser and the
    /// orchestrator's execution bookkeeping enrich it.
    pub fn new(success: bool, stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            success,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            data: Vec::new(),
            data_format: DataFormat::List,
            structured_output: None,
            metadata: HashMap::new(),
            history: ExecutionHistory::new(),
        }
    }

    /// Attach parsed rows, returning `self` for builder-style chaining.
    pub fn with_data(mut self, data: Vec<Row>) -> Self {
        self.data = data;
        self
    }

    /// Attach a metadata entry, returning `self` for builder-style chaining.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// This result's own `ExecutionHistory` (spec §6's `get_history()`).
    pub fn get_history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Convert this result's canonical `data` into `target`, returning a
    /// *new* `CommandResult` (spec §4.6): `raw_output`/`history` are
    /// carried over untouched apart from one appended `op: "convert"`
    /// step, `data_format`/`structured_output` reflect the conversion.
    /// `target == List` is always a no-op clone. On an unsupported
    /// conversion (`DataFrame`/`NdArray` with the collaborator feature
    /// off), the returned result has `success: false` and an
    /// `error_message` metadata entry, with the original left untouched
    /// (this method never mutates `self`).
    pub fn to_format(&self, target: DataFormat) -> CommandResult {
        if matches!(target, DataFormat::List) {
            let mut result = self.clone();
            result.data_format = DataFormat::List;
            result.structured_output = None;
            return result;
        }

        match DataFormatConverter::convert(&self.data, target) {
            Some(converted) => {
                let mut result = self.clone();
                result.data_format = target;
                result.structured_output = Some(converted);

                let now = Utc::now();
                let context_snapshot = self
                    .history
                    .last()
                    .map(|s| s.context_snapshot.clone())
                    .unwrap_or_else(ContextSnapshot::default);
                let command_name = self
                    .history
                    .last()
                    .map(|s| s.command_name.clone())
                    .unwrap_or_default();

                result.history.append(ExecutionStep {
                    step_id: 0,
                    command_name,
                    command_string: format!("to_format({})", target.as_str()),
                    started_at: now,
                    completed_at: now,
                    exit_code: self.exit_code,
                    success: true,
                    output_excerpt: truncate_excerpt(&self.stdout),
                    error_excerpt: String::new(),
                    data_format: target,
                    structured_summary: StructuredSummary::from_rows(&self.data),
                    context_snapshot,
                    cached: false,
                    op: "convert".to_string(),
                });

                result
            }
            None => {
                let mut result = self.clone();
                result.success = false;
                result.metadata.insert(
                    "error_message".to_string(),
                    format!("cannot convert to {}", target.as_str()),
                );
                result
            }
        }
    }

    /// Shorthand for `extract_field` over this result's own rows.
    pub fn extract_field(&self, field: &str) -> Vec<Value> {
        extract_field(&self.data, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rows() -> Vec<Row> {
        vec![
            Row::from_iter([
                ("name".to_string(), json!("alice")),
                ("age".to_string(), json!(30)),
            ]),
            Row::from_iter([
                ("name".to_string(), json!("bob")),
                ("age".to_string(), json!(41)),
                ("city".to_string(), json!("ny")),
            ]),
        ]
    }

    #[test]
    fn test_to_table_unions_columns_in_first_seen_order() {
        let rows = sample_rows();
        let converted = DataFormatConverter::convert(&rows, DataFormat::Table).unwrap();
        match converted {
            ConvertedData::Table { columns, rows } => {
                assert_eq!(columns, vec!["name", "age", "city"]);
                assert_eq!(rows[0], vec!["alice", "30", ""]);
                assert_eq!(rows[1], vec!["bob", "41", "ny"]);
            }
            _ => panic!("expected Table"),
        }
    }

    #[test]
    fn test_to_json_round_trips_values() {
        let rows = sample_rows();
        let converted = DataFormatConverter::convert(&rows, DataFormat::Json).unwrap();
        match converted {
            ConvertedData::Json(Value::Array(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0]["name"], json!("alice"));
            }
            _ => panic!("expected Json array"),
        }
    }

    #[test]
    fn test_extract_field_drops_absent_rows() {
        let rows = sample_rows();
        let cities = extract_field(&rows, "city");
        assert_eq!(cities, vec![json!("ny")]);
    }

    #[test]
    fn test_dataframe_and_ndarray_unsupported_here() {
        let rows = sample_rows();
        assert!(DataFormatConverter::convert(&rows, DataFormat::DataFrame).is_none());
        assert!(DataFormatConverter::convert(&rows, DataFormat::NdArray).is_none());
    }

    #[test]
    fn test_to_format_returns_new_result_with_history_step_appended() {
        let original = CommandResult::new(true, "out", "", 0).with_data(sample_rows());
        let converted = original.to_format(DataFormat::Json);

        assert!(converted.success);
        assert_eq!(converted.data_format, DataFormat::Json);
        assert!(matches!(converted.structured_output, Some(ConvertedData::Json(_))));
        assert_eq!(converted.stdout, original.stdout);
        assert_eq!(converted.history.len(), original.history.len() + 1);
        assert_eq!(converted.history.last().unwrap().op, "convert");

        // the original is untouched
        assert_eq!(original.data_format, DataFormat::List);
        assert!(original.history.is_empty());
    }

    #[test]
    fn test_to_format_unsupported_target_fails_without_mutating_original() {
        let original = CommandResult::new(true, "out", "", 0).with_data(sample_rows());
        let converted = original.to_format(DataFormat::DataFrame);

        assert!(!converted.success);
        assert!(converted.metadata.contains_key("error_message"));
        assert!(original.success);
    }

    #[test]
    fn test_command_result_builder() {
        let result = CommandResult::new(true, "out", "", 0)
            .with_data(sample_rows())
            .with_metadata("parser_name", "kv");
        assert!(result.success);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.metadata.get("parser_name").unwrap(), "kv");
        assert_eq!(result.extract_field("name"), vec![json!("alice"), json!("bob")]);
    }
}
