//! # Command
//!
//! `Command` is the immutable, strongly-typed builder at the center of
//! the engine (spec §3, §4.1): a name, arguments, and a handful of
//! optional policies (success override, output parser, pipe
//! compatibility, cache opt-out). Every builder method consumes `self` and
//! returns a new `Command`, the same "configure by returning a new value"
//! style the teacher applies to `Context`'s construction helpers, just
//! made immutable here since `Command`s are shared across `CommandChain`
//! links (spec §4.4).

pub mod parsers;
pub mod registry;

use std::sync::Arc;

use crate::backend::Invocation;
use crate::context::ExecutionContext;
use crate::error::{MancerError, MancerResult};
use crate::result::{CommandResult, Row};

/// Decides whether a finished execution counts as successful, overriding
/// the default "exit code zero" rule (spec §4.1 — e.g. `grep`'s "exit 1
/// means no match" is still a successful search).
pub type SuccessOverride = Arc<dyn Fn(&CommandResult) -> bool + Send + Sync>;

/// Parses raw stdout into the engine's canonical row format.
pub type ParseFn = Arc<dyn Fn(&str) -> MancerResult<Vec<Row>> + Send + Sync>;

const UNQUOTED_SAFE: &[char] = &[
    '-', '_', '.', '/', ':', '=', ',', '+', '@', '%',
];

/// Quote `arg` for inclusion in a rendered shell command line, using the
/// same single-quote-with-escaped-apostrophes strategy the teacher's
/// `safe_run::shell_escape_command` uses for its log-friendly rendering —
/// generalized here to a wider metacharacter set since this engine's
/// rendering is sometimes actually interpreted by a remote shell (spec
/// §4.3's pipe rendering), not just logged.
pub fn quote_arg(arg: &str) -> String {
    let needs_quoting = arg.is_empty()
        || !arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || UNQUOTED_SAFE.contains(&c));

    if needs_quoting {
        format!("'{}'", arg.replace('\'', "'\\''"))
    } else {
        arg.to_string()
    }
}

/// A composable, strongly-typed shell command (spec §3, §4.1).
#[derive(Clone)]
pub struct Command {
    name: String,
    args: Vec<String>,
    pipe_compatible: bool,
    no_cache: bool,
    success_override: Option<SuccessOverride>,
    parser: Option<ParseFn>,
}

impl Command {
    /// Construct a command named `name` with no arguments. `name` must be
    /// non-empty and must not itself contain whitespace (that would
    /// signal a caller trying to smuggle arguments into the program
    /// field) — violating either is a `BuilderError` (spec §4.1).
    pub fn new(name: impl Into<String>) -> MancerResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MancerError::BuilderError(
                "command name must not be empty".to_string(),
            ));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(MancerError::BuilderError(format!(
                "command name {name:?} must not contain whitespace; use .arg() for arguments"
            )));
        }
        Ok(Self {
            name,
            args: Vec::new(),
            pipe_compatible: false,
            no_cache: false,
            success_override: None,
            parser: None,
        })
    }

    /// Program name (e.g. `"grep"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments appended so far, in order.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Append a single argument, returning a new `Command`.
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append several arguments at once, returning a new `Command`.
    pub fn args_extend<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Mark this command as renderable inside a shell-level `|` pipe
    /// rather than needing stdin plumbed in manually (spec §4.4). Builtin
    /// commands that always read whole-file/whole-stream input (`grep`,
    /// `wc`, `cat`) set this; ones that don't read stdin at all (`ls`,
    /// `systemctl`) leave it `false`.
    pub fn pipe_compatible(mut self, value: bool) -> Self {
        self.pipe_compatible = value;
        self
    }

    /// Whether this command declared itself pipe-compatible.
    pub fn is_pipe_compatible(&self) -> bool {
        self.pipe_compatible
    }

    /// Opt this command's executions out of the result cache entirely
    /// (spec §4.8) — used by commands whose output is inherently
    /// time-varying (e.g. `ps`, `date`).
    pub fn no_cache(mut self, value: bool) -> Self {
        self.no_cache = value;
        self
    }

    /// Whether this command has opted out of caching.
    pub fn is_no_cache(&self) -> bool {
        self.no_cache
    }

    /// Override the default "exit code zero" success rule.
    pub fn success_override(mut self, f: impl Fn(&CommandResult) -> bool + Send + Sync + 'static) -> Self {
        self.success_override = Some(Arc::new(f));
        self
    }

    /// Attach a parser turning raw stdout into structured rows.
    pub fn parser(mut self, f: impl Fn(&str) -> MancerResult<Vec<Row>> + Send + Sync + 'static) -> Self {
        self.parser = Some(Arc::new(f));
        self
    }

    /// Apply this command's success rule (or the exit-code-zero default)
    /// to a finished, parsed result.
    pub fn is_success(&self, result: &CommandResult) -> bool {
        match &self.success_override {
            Some(f) => f(result),
            None => result.exit_code == 0,
        }
    }

    /// Parse `stdout` using this command's attached parser, if any. A
    /// parser failure never fails the command (spec §4.3 step 9): callers
    /// should fall back to an empty row set and record the failure kind
    /// in `CommandResult::metadata` instead of propagating the error.
    pub fn parse(&self, stdout: &str) -> MancerResult<Vec<Row>> {
        match &self.parser {
            Some(f) => f(stdout),
            None => Ok(Vec::new()),
        }
    }

    /// Whether a parser is attached at all.
    pub fn has_parser(&self) -> bool {
        self.parser.is_some()
    }

    /// Render this command, with `ctx`'s working directory/environment/
    /// parameters applied, into a backend-ready `Invocation` (spec §4.2,
    /// §4.3). Arguments are quoted for their eventual rendering into a
    /// fingerprint/log line; actual process spawning still passes them as
    /// a discrete argv, never through a shell, so quoting here is a
    /// defense against ambiguous logs and pipe-rendering, not an
    /// injection boundary for `LocalBackend`/`RemoteBackend` themselves.
    pub fn render(&self, ctx: &ExecutionContext) -> MancerResult<Invocation> {
        let mut invocation = Invocation::new(self.name.clone(), self.args.clone(), ctx.cwd().clone());
        invocation.env = ctx.env().clone();
        invocation.stdin = ctx.parameter_str("input_data").map(str::to_string);
        invocation.timeout = ctx.timeout();
        invocation.live_output = ctx.parameter_bool("live_output").unwrap_or(false);
        Ok(invocation)
    }

    /// The command line as it would read rendered for a human or a cache
    /// fingerprint: `name arg1 arg2 ...` with each argument quoted.
    pub fn rendered_line(&self) -> String {
        let mut parts = vec![self.name.clone()];
        parts.extend(self.args.iter().map(|a| quote_arg(a)));
        parts.join(" ")
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("pipe_compatible", &self.pipe_compatible)
            .field("no_cache", &self.no_cache)
            .field("has_success_override", &self.success_override.is_some())
            .field("has_parser", &self.parser.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_is_builder_error() {
        assert!(matches!(Command::new(""), Err(MancerError::BuilderError(_))));
        assert!(matches!(Command::new("   "), Err(MancerError::BuilderError(_))));
    }

    #[test]
    fn test_whitespace_in_name_is_builder_error() {
        assert!(matches!(
            Command::new("ls -la"),
            Err(MancerError::BuilderError(_))
        ));
    }

    #[test]
    fn test_quote_arg_leaves_safe_tokens_bare() {
        assert_eq!(quote_arg("hello"), "hello");
        assert_eq!(quote_arg("/var/log/syslog"), "/var/log/syslog");
        assert_eq!(quote_arg("--flag=value"), "--flag=value");
    }

    #[test]
    fn test_quote_arg_escapes_metacharacters() {
        assert_eq!(quote_arg("hello world"), "'hello world'");
        assert_eq!(quote_arg("a;rm -rf /"), "'a;rm -rf /'");
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_rendered_line() {
        let cmd = Command::new("grep").unwrap().arg("-n").arg("hello world");
        assert_eq!(cmd.rendered_line(), "grep -n 'hello world'");
    }

    #[test]
    fn test_default_success_is_exit_code_zero() {
        let cmd = Command::new("ls").unwrap();
        assert!(cmd.is_success(&CommandResult::new(true, "", "", 0)));
        assert!(!cmd.is_success(&CommandResult::new(true, "", "", 1)));
    }

    #[test]
    fn test_success_override_treats_no_match_as_success() {
        let cmd = Command::new("grep")
            .unwrap()
            .success_override(|r| r.exit_code == 0 || r.exit_code == 1);
        assert!(cmd.is_success(&CommandResult::new(false, "", "", 1)));
        assert!(!cmd.is_success(&CommandResult::new(false, "", "", 2)));
    }

    #[test]
    fn test_render_applies_context() {
        let mut ctx = ExecutionContext::new();
        ctx.set_parameter("input_data", "piped\n");
        ctx.set_parameter("live_output", true);
        let cmd = Command::new("cat").unwrap();
        let invocation = cmd.render(&ctx).unwrap();
        assert_eq!(invocation.stdin.as_deref(), Some("piped\n"));
        assert!(invocation.live_output);
    }
}
