//! # Execution Backends
//!
//! An `ExecutionBackend` is the thing that actually runs a rendered
//! invocation somewhere: on this machine (`LocalBackend`) or over SSH on a
//! remote one (`RemoteBackend`). `Command` builds an `Invocation` and hands
//! it to whichever backend the `ExecutionContext`'s mode selects (spec §3,
//! §5) — the trait-object dispatch pattern the teacher uses for
//! `Installer` implementations in `bootstrap_v2::installer`.

pub mod local;
pub mod remote;

use crate::error::MancerResult;
use crate::result::CommandResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A fully rendered, ready-to-run invocation: program, quoted args, and
/// the execution parameters a backend needs (spec §4.2, §4.3).
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program to execute (already resolved, e.g. `"grep"`).
    pub program: String,
    /// Arguments, already individually quoted where the shell requires it.
    pub args: Vec<String>,
    /// Working directory to run in.
    pub cwd: PathBuf,
    /// Extra environment variables to set for the child.
    pub env: HashMap<String, String>,
    /// Data to write to the child's stdin, if any (spec §4.4 pipe support).
    pub stdin: Option<String>,
    /// Wall-clock budget before the backend cancels the child
    /// (`MancerError::Timeout`).
    pub timeout: Option<Duration>,
    /// Whether stdout/stderr should be streamed to the caller as produced
    /// rather than only returned on completion (spec §5's `--live` mode).
    pub live_output: bool,
}

impl Invocation {
    /// Construct an invocation with no stdin, no timeout, and live output
    /// disabled — the common case for a single builtin command.
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            cwd,
            env: HashMap::new(),
            stdin: None,
            timeout: None,
            live_output: false,
        }
    }

    /// The program and args joined with spaces, purely for logging/cache
    /// fingerprints — never re-parsed by a shell.
    pub fn rendered_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Cooperative cancellation signal shared between a caller (CLI Ctrl-C
/// handler, orchestrator-level `cancel()`) and a running backend
/// invocation. Generalizes the teacher's `safe_run::execute` SIGINT/SIGTERM
/// handling (an `Arc<AtomicBool>` flipped by `signal_hook::flag::register`)
/// into something backends can also flip programmatically.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Construct a token in the not-cancelled state.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes a rendered `Invocation` somewhere and produces a `CommandResult`
/// (spec §3, §5). Implementations never return `Err` for the child's own
/// failure (a non-zero exit still yields `Ok(CommandResult{success:
/// false, ..})`) — `Err` is reserved for backend-level faults that prevent
/// the child from running or finishing at all (spawn failure, SSH
/// connect/auth failure, cancellation, timeout).
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run `invocation`, honoring `cancel` for cooperative cancellation.
    async fn execute(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> MancerResult<CommandResult>;

    /// Run `--version` (or the tool-appropriate equivalent) for `program`
    /// and return its raw stdout, used by the version registry (spec
    /// §4.5). Default implementation shells out to `execute` with a
    /// `--version` invocation; `RemoteBackend` and `LocalBackend` both use
    /// this default.
    async fn detect_version_output(&self, program: &str, cwd: &PathBuf) -> MancerResult<String> {
        let invocation = Invocation::new(program, vec!["--version".to_string()], cwd.clone());
        let result = self.execute(&invocation, &CancellationToken::new()).await?;
        Ok(result.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_invocation_rendered_line() {
        let invocation = Invocation::new(
            "grep",
            vec!["-n".to_string(), "foo".to_string()],
            PathBuf::from("/tmp"),
        );
        assert_eq!(invocation.rendered_line(), "grep -n foo");
    }
}
