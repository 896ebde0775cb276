//! # Command Chains
//!
//! `CommandChain` composes `Command`s two ways (spec §4.4): `pipe`, which
//! feeds one link's stdout into the next link's stdin (generalizing shell
//! `|`), and `then`, which simply runs the next link after the previous
//! one finishes, carrying the `ExecutionContext` forward unchanged. Chain
//! execution itself is done through a caller-supplied closure rather than
//! a hard dependency on `Orchestrator`, the same inversion the teacher
//! uses in `bootstrap_v2::executor::Executor::execute_step_impl` (an
//! associated function taking `&InstallerRegistry`/`&LockManager` as
//! parameters instead of owning them).

use chrono::Utc;

use crate::command::Command;
use crate::context::ExecutionContext;
use crate::error::MancerResult;
use crate::history::{truncate_excerpt, ExecutionHistory, ExecutionStep};
use crate::result::{CommandResult, DataFormat, StructuredSummary};

enum Link {
    /// The first command in the chain.
    Root(Command),
    /// Runs after the previous link, with its stdout fed in as stdin.
    Pipe(Command),
    /// Runs after the previous link, context carried forward unchanged.
    Then(Command),
}

impl Link {
    fn command(&self) -> &Command {
        match self {
            Self::Root(c) | Self::Pipe(c) | Self::Then(c) => c,
        }
    }
}

/// An ordered composition of `Command`s (spec §4.4).
pub struct CommandChain {
    links: Vec<Link>,
    data_format: Option<DataFormat>,
}

impl CommandChain {
    /// Start a chain with `root` as its first link.
    pub fn new(root: Command) -> Self {
        Self {
            links: vec![Link::Root(root)],
            data_format: None,
        }
    }

    /// Append `next`, feeding the previous link's stdout into its stdin
    /// (spec §4.4). Builtins that declared themselves pipe-compatible via
    /// `Command::pipe_compatible` are the intended targets, but this is
    /// advisory, not enforced: stdin plumbing works for any command that
    /// reads from stdin, pipe-compatible or not.
    pub fn pipe(mut self, next: Command) -> Self {
        self.links.push(Link::Pipe(next));
        self
    }

    /// Append `next`, running it after the previous link with the
    /// `ExecutionContext` carried forward unchanged — no stdin plumbing
    /// (spec §4.4).
    pub fn then(mut self, next: Command) -> Self {
        self.links.push(Link::Then(next));
        self
    }

    /// Request that the chain's final result also be available in
    /// `format` via `CommandResult::to_format` (spec §4.6).
    pub fn with_data_format(mut self, format: DataFormat) -> Self {
        self.data_format = Some(format);
        self
    }

    /// Number of links in this chain.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether this chain has no links (never true for a chain built via
    /// `new`, but useful for generic callers).
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The rendered shell string for this chain (spec §4.4): consecutive
    /// `pipe` links join onto the preceding command with `" | "`; a
    /// `then` link starts a new, semicolon-separated group since it does
    /// not plumb stdin. For a chain made only of `pipe` links this is
    /// exactly `"<left> | <right> | ..."` (spec §8 scenario 2).
    pub fn rendered_string(&self) -> String {
        let mut groups: Vec<String> = Vec::new();
        for link in &self.links {
            let rendered = link.command().rendered_line();
            match link {
                Link::Pipe(_) => match groups.last_mut() {
                    Some(last) => {
                        last.push_str(" | ");
                        last.push_str(&rendered);
                    }
                    None => groups.push(rendered),
                },
                Link::Root(_) | Link::Then(_) => groups.push(rendered),
            }
        }
        groups.join("; ")
    }

    /// Run every link in order against a cloned `ctx`, using `exec` to
    /// actually execute each `Command` (typically
    /// `Orchestrator::execute_command`). Returns the final link's result
    /// with its `history` replaced by the concatenation of every link's
    /// step, renumbered from zero (spec §4.4: "a chain's history is the
    /// concatenation of its links' histories").
    ///
    /// Stops at the first link whose execution returns `Err` — only
    /// `MancerError::BuilderError` ever reaches here as an `Err` per the
    /// engine's propagation policy (spec §7), since `exec` is expected to
    /// already have converted backend-level failures into a `CommandResult`
    /// with `success: false`.
    pub fn execute<F>(&self, ctx: &ExecutionContext, mut exec: F) -> MancerResult<CommandResult>
    where
        F: FnMut(&Command, &ExecutionContext) -> MancerResult<CommandResult>,
    {
        let mut history = ExecutionHistory::new();
        let mut working_ctx = ctx.deep_clone();
        let mut last_result: Option<CommandResult> = None;

        for link in &self.links {
            match link {
                Link::Root(_) | Link::Then(_) => {
                    working_ctx.set_parameter("input_data", serde_json::Value::Null);
                }
                Link::Pipe(_) => {
                    if let Some(prev) = &last_result {
                        working_ctx.set_parameter("input_data", prev.stdout.clone());
                    }
                }
            }

            let command = link.command();
            let started_at = Utc::now();
            let result = exec(command, &working_ctx)?;
            let completed_at = Utc::now();

            history.append(ExecutionStep {
                step_id: 0,
                command_name: command.name().to_string(),
                command_string: command.rendered_line(),
                started_at,
                completed_at,
                exit_code: result.exit_code,
                success: result.success,
                output_excerpt: truncate_excerpt(&result.stdout),
                error_excerpt: truncate_excerpt(&result.stderr),
                data_format: result.data_format,
                structured_summary: StructuredSummary::from_rows(&result.data),
                context_snapshot: working_ctx.snapshot(),
                cached: false,
                op: "execute".to_string(),
            });

            last_result = Some(result);
        }

        let mut final_result = last_result.expect("a CommandChain always has at least one link");
        final_result.history = history;
        Ok(final_result)
    }

    /// The `DataFormat` requested via `with_data_format`, if any.
    pub fn data_format(&self) -> Option<DataFormat> {
        self.data_format
    }

    /// Iterate over every link's `Command`, in order. Exposed so an async
    /// executor (`Orchestrator::execute_chain`) can drive the chain itself
    /// instead of going through the synchronous `execute` callback.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.links.iter().map(Link::command)
    }

    /// Whether the link at `index` is a `pipe` link (its stdin should be
    /// fed the previous link's stdout) as opposed to a `then` link or the
    /// root.
    pub fn is_pipe_link(&self, index: usize) -> bool {
        matches!(self.links.get(index), Some(Link::Pipe(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn cmd(name: &str) -> Command {
        Command::new(name).unwrap()
    }

    #[test]
    fn test_single_link_chain() {
        let chain = CommandChain::new(cmd("echo"));
        let ctx = ExecutionContext::new();
        let result = chain
            .execute(&ctx, |_cmd, _ctx| Ok(CommandResult::new(true, "hi", "", 0)))
            .unwrap();
        assert_eq!(result.stdout, "hi");
        assert_eq!(result.history.steps().len(), 1);
    }

    #[test]
    fn test_pipe_feeds_stdout_into_next_stdin() {
        let chain = CommandChain::new(cmd("cat")).pipe(cmd("wc"));
        let ctx = ExecutionContext::new();

        let result = chain
            .execute(&ctx, |command, ctx| {
                if command.name() == "cat" {
                    Ok(CommandResult::new(true, "three\nlines\nhere\n", "", 0))
                } else {
                    let input = ctx.parameter_str("input_data").unwrap_or_default();
                    let count = input.lines().count();
                    Ok(CommandResult::new(true, count.to_string(), "", 0))
                }
            })
            .unwrap();

        assert_eq!(result.stdout, "3");
        assert_eq!(result.history.steps().len(), 2);
    }

    #[test]
    fn test_then_does_not_pipe_stdout() {
        let chain = CommandChain::new(cmd("first")).then(cmd("second"));
        let ctx = ExecutionContext::new();

        let result = chain
            .execute(&ctx, |command, ctx| {
                if command.name() == "first" {
                    Ok(CommandResult::new(true, "first-output", "", 0))
                } else {
                    assert!(ctx.parameter_str("input_data").is_none());
                    Ok(CommandResult::new(true, "second-output", "", 0))
                }
            })
            .unwrap();

        assert_eq!(result.stdout, "second-output");
    }

    #[test]
    fn test_history_ids_are_renumbered_from_zero() {
        let chain = CommandChain::new(cmd("a")).then(cmd("b")).then(cmd("c"));
        let ctx = ExecutionContext::new();
        let result = chain
            .execute(&ctx, |_cmd, _ctx| Ok(CommandResult::new(true, "", "", 0)))
            .unwrap();
        let ids: Vec<u64> = result.history.steps().iter().map(|s| s.step_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_rendered_string_joins_pipe_links_with_pipe() {
        let chain = CommandChain::new(cmd("ps").arg("-ef")).pipe(cmd("grep").arg("bash"));
        assert_eq!(chain.rendered_string(), "ps -ef | grep bash");
    }

    #[test]
    fn test_rendered_string_separates_then_links_with_semicolon() {
        let chain = CommandChain::new(cmd("first")).then(cmd("second"));
        assert_eq!(chain.rendered_string(), "first; second");
    }
}
