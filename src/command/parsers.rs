//! # Output Parsers and Version-Adapter Dispatch
//!
//! Builtin commands don't parse their own output inline; they register a
//! parser per tool-version pattern in a `ParserRegistry`, and the
//! orchestrator resolves the best-matching adapter via
//! `version::select_best_match` before running (spec §4.5). This mirrors
//! the teacher's `InstallerRegistry` (a name-keyed table of trait objects
//! resolved at dispatch time), generalized from "one implementation per
//! tool id" to "one implementation per (tool id, version pattern)".

use std::collections::HashMap;

use crate::command::ParseFn;
use crate::error::MancerError;
use crate::result::Row;
use crate::version::{select_best_match, ToolVersion, VersionPattern};
use serde_json::json;

/// Split `output` into non-empty, trimmed lines.
fn lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Parses whitespace-separated tabular output (`ps`, `df -h`, ...): first
/// line is the header, every subsequent line is split on runs of
/// whitespace and zipped against the header. A data row with more fields
/// than the header (common with `ps aux`'s free-text `COMMAND` column)
/// folds the overflow into the last column.
pub fn parse_whitespace_table(output: &str) -> Result<Vec<Row>, MancerError> {
    let mut line_iter = lines(output);
    let header: Vec<&str> = match line_iter.next() {
        Some(h) => h.split_whitespace().collect(),
        None => return Ok(Vec::new()),
    };
    if header.is_empty() {
        return Err(MancerError::ParserFailed("empty header line".to_string()));
    }

    let rows = line_iter
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let mut row = Row::new();
            for (i, col) in header.iter().enumerate() {
                let value = if i + 1 == header.len() {
                    fields.get(i..).map(|rest| rest.join(" ")).unwrap_or_default()
                } else {
                    fields.get(i).map(|s| s.to_string()).unwrap_or_default()
                };
                row.insert(col.to_lowercase(), json!(value));
            }
            row
        })
        .collect();

    Ok(rows)
}

/// Parses `grep -n`-style `N:content` lines into `{line_number, content}`
/// rows; plain `grep` output (no line numbers) yields `{content}` rows.
pub fn parse_grep_output(output: &str) -> Result<Vec<Row>, MancerError> {
    let rows = lines(output)
        .map(|line| {
            let mut row = Row::new();
            if let Some((num, rest)) = line.split_once(':') {
                if let Ok(n) = num.parse::<u64>() {
                    row.insert("line_number".to_string(), json!(n));
                    row.insert("content".to_string(), json!(rest));
                    return row;
                }
            }
            row.insert("content".to_string(), json!(line));
            row
        })
        .collect();
    Ok(rows)
}

/// Parses `key=value`/`key: value` lines (`systemctl show`, `env`) into
/// a single row per line.
pub fn parse_kv_lines(output: &str) -> Result<Vec<Row>, MancerError> {
    let rows = lines(output)
        .filter_map(|line| {
            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))?;
            let mut row = Row::new();
            row.insert("key".to_string(), json!(key.trim()));
            row.insert("value".to_string(), json!(value.trim()));
            Some(row)
        })
        .collect();
    Ok(rows)
}

/// Registry mapping a tool name to the version-adapter table spec §4.5
/// describes: each entry names the `VersionPattern` it covers, and the
/// most specific matching entry wins.
#[derive(Default)]
pub struct ParserRegistry {
    adapters: HashMap<String, Vec<(VersionPattern, ParseFn)>>,
}

impl ParserRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `parser` for `tool` under `pattern`.
    pub fn register(&mut self, tool: impl Into<String>, pattern: VersionPattern, parser: ParseFn) {
        self.adapters.entry(tool.into()).or_default().push((pattern, parser));
    }

    /// Resolve the most specific parser registered for `tool` that
    /// matches `version` (spec §4.5's exact > X.Y > X.x > range > X+
    /// precedence, implemented in `version::select_best_match`).
    pub fn resolve(&self, tool: &str, version: &ToolVersion) -> Option<ParseFn> {
        let entries = self.adapters.get(tool)?;
        let patterns: Vec<VersionPattern> = entries.iter().map(|(p, _)| p.clone()).collect();
        let best = select_best_match(version, &patterns)?;
        entries
            .iter()
            .find(|(p, _)| p == best)
            .map(|(_, parser)| parser.clone())
    }

    /// Whether any adapter at all is registered for `tool`.
    pub fn has_adapters_for(&self, tool: &str) -> bool {
        self.adapters.contains_key(tool)
    }
}
