//! # Execution History
//!
//! `ExecutionHistory` is the append-only ledger every `CommandResult` owns
//! a slice of (spec §3, §4.7), modeled after the monotonic
//! sequence-numbered event ledger in the teacher's `safe_run.rs` (an
//! `AtomicU64` counter stamping each buffered output line) but scoped to
//! one in-memory `Vec` per result/orchestrator rather than a process-wide
//! counter. Each `ExecutionStep` carries excerpted, summarized fields
//! rather than a full nested `CommandResult` — the step describes an
//! execution, it doesn't re-embed one.

use crate::context::ContextSnapshot;
use crate::result::{DataFormat, StructuredSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on retained steps before the oldest are dropped (spec
/// §4.7: "unbounded history is a memory leak risk; older steps are
/// dropped past a configured maximum").
pub const MAX_STEPS: usize = 1000;

/// Output/error excerpts are truncated past this many bytes (spec §3:
/// "output_excerpt/error_excerpt (truncated)").
pub const EXCERPT_LIMIT: usize = 4096;

/// Truncate `s` to `EXCERPT_LIMIT` bytes at a char boundary, appending an
/// ellipsis if anything was cut.
pub fn truncate_excerpt(s: &str) -> String {
    if s.len() <= EXCERPT_LIMIT {
        return s.to_string();
    }
    let mut cut = EXCERPT_LIMIT;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &s[..cut])
}

/// One recorded execution (spec §3): the command that ran, when, how it
/// finished, and enough of a summary of its output to inspect without
/// re-embedding the full `CommandResult` it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Monotonic, history-local sequence number.
    pub step_id: u64,
    /// The command's program name (e.g. `"grep"`).
    pub command_name: String,
    /// The shell-rendered command line that was run (post-quoting), or a
    /// synthetic description for non-execution steps (e.g. `to_format`'s
    /// `"convert"` step).
    pub command_string: String,
    /// Wall-clock time execution began.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time execution finished.
    pub completed_at: DateTime<Utc>,
    /// Exit code reported by the child (or the originating result's, for
    /// non-execution steps).
    pub exit_code: i32,
    /// Whether this step counts as successful.
    pub success: bool,
    /// Truncated standard output.
    pub output_excerpt: String,
    /// Truncated standard error.
    pub error_excerpt: String,
    /// The `DataFormat` the result was in after this step.
    pub data_format: DataFormat,
    /// Row/field counts only — never the rows themselves (spec §3:
    /// "structured_summary (counts only)").
    pub structured_summary: StructuredSummary,
    /// cwd/mode/host at the time of execution.
    pub context_snapshot: ContextSnapshot,
    /// Whether this step describes a cache hit rather than a fresh
    /// execution (spec §4.8).
    pub cached: bool,
    /// What kind of step this is: `"execute"` for a command run,
    /// `"convert"` for a `CommandResult::to_format` call (spec §4.6).
    pub op: String,
}

/// Append-only history of executed steps, with overflow bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    steps: Vec<ExecutionStep>,
    next_id: u64,
    /// Count of steps dropped to stay within `MAX_STEPS`, surfaced so
    /// callers can tell history is lossy rather than silently truncated.
    dropped: u64,
}

impl ExecutionHistory {
    /// Construct an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `step`, assigning it the next monotonic `step_id` (any
    /// `step_id` already set is overwritten) and evicting the oldest
    /// entry if the history is at capacity.
    pub fn append(&mut self, mut step: ExecutionStep) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        step.step_id = id;

        if self.steps.len() >= MAX_STEPS {
            self.steps.remove(0);
            self.dropped += 1;
        }

        self.steps.push(step);
        id
    }

    /// All retained steps, oldest first.
    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    /// Number of retained steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether this history holds no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps dropped due to `MAX_STEPS` overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Most recently appended step, if any.
    pub fn last(&self) -> Option<&ExecutionStep> {
        self.steps.last()
    }

    /// Remove every retained step. `next_id` and `dropped_count` are left
    /// untouched so ids stay unique across a `clear()` (spec §4.7: "ids
    /// are never reused within one history's lifetime"). Only meaningful
    /// before a history is owned by a returned `CommandResult`.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Append every step from `other` onto the end of `self`, renumbering
    /// them to keep `id` monotonic and unique — used when composing
    /// results (spec §4.4: "a chain's history is the concatenation of its
    /// links' histories, renumbered").
    pub fn merge(&mut self, other: &ExecutionHistory) {
        for step in &other.steps {
            self.append(step.clone());
        }
        self.dropped += other.dropped;
    }

    /// Total steps ever appended, including ones since dropped.
    pub fn total_appended(&self) -> u64 {
        self.next_id
    }
}
