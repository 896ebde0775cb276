//! # Orchestrator
//!
//! `Orchestrator` is the facade spec §9 settles on in place of a split
//! `ShellRunner`/`CommandManager`: one object owning the backends, cache,
//! history, version registry, and parser registry a caller needs to run
//! `Command`s and `CommandChain`s (spec §3, §9's Open Question #1 — see
//! DESIGN.md). It injects its `Log` capability rather than reaching for a
//! process-wide singleton, the seam spec §9 calls out explicitly, and
//! generalizes the teacher's `bootstrap_v2::executor::Executor` (which
//! owns an `InstallerRegistry` and `LockManager` the same way this owns a
//! `ParserRegistry` and backend map).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::backend::local::LocalBackend;
use crate::backend::remote::RemoteBackend;
use crate::backend::{CancellationToken, ExecutionBackend};
use crate::cache::{current_uid, fingerprint, CacheKeyInput, ResultCache};
use crate::chain::CommandChain;
use crate::command::parsers::ParserRegistry;
use crate::command::Command;
use crate::config::Config;
use crate::context::{ExecutionContext, ExecutionMode, RemoteTarget};
use crate::error::{MancerError, MancerResult};
use crate::history::{truncate_excerpt, ExecutionHistory, ExecutionStep};
use crate::logging::{field, Log, LogLevel, TracingLog};
use crate::result::{CommandResult, StructuredSummary};
use crate::version::{parse_version, ToolVersion, ToolVersionRegistry};

/// Facade tying `Command`/`CommandChain` construction to execution,
/// caching, version detection, and history (spec §3).
pub struct Orchestrator {
    local_backend: Arc<LocalBackend>,
    remote_backends: Mutex<HashMap<String, Arc<RemoteBackend>>>,
    cache: Mutex<ResultCache>,
    history: Mutex<ExecutionHistory>,
    version_registry: ToolVersionRegistry,
    parser_registry: ParserRegistry,
    log: Arc<dyn Log>,
    cancel: CancellationToken,
    cache_enabled: AtomicBool,
}

impl Orchestrator {
    /// Build an orchestrator from a loaded `Config`, using `TracingLog` as
    /// the default logger.
    pub fn new(config: &Config) -> MancerResult<Self> {
        Self::with_log(config, Arc::new(TracingLog))
    }

    /// Build an orchestrator with an injected `Log` capability (spec §6,
    /// §9) — tests pass a `RecordingLog` here instead of `TracingLog`.
    pub fn with_log(config: &Config, log: Arc<dyn Log>) -> MancerResult<Self> {
        let local_backend = Arc::new(LocalBackend::new()?);
        let cache = ResultCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_seconds));
        Ok(Self {
            local_backend,
            remote_backends: Mutex::new(HashMap::new()),
            cache: Mutex::new(cache),
            history: Mutex::new(ExecutionHistory::new()),
            version_registry: ToolVersionRegistry::new(),
            parser_registry: ParserRegistry::new(),
            log,
            cancel: CancellationToken::new(),
            cache_enabled: AtomicBool::new(!config.cache_disabled()),
        })
    }

    /// Convenience sugar for `Command::new` (spec §3's `create_command`).
    pub fn create_command(&self, name: impl Into<String>) -> MancerResult<Command> {
        Command::new(name)
    }

    /// Register a version-scoped output parser, made available to every
    /// `execute_command` call for `tool` (spec §4.5). Builtins normally
    /// attach their own parser directly via `Command::parser`; this path
    /// exists for adapters that must vary strictly by detected version
    /// rather than being fixed at construction time.
    pub fn register_parser(&mut self, tool: impl Into<String>, pattern: crate::version::VersionPattern, parser: crate::command::ParseFn) {
        self.parser_registry.register(tool, pattern, parser);
    }

    /// Point `ctx` at local execution.
    pub fn set_local_execution(&self, ctx: &mut ExecutionContext) {
        ctx.set_local_mode();
    }

    /// Point `ctx` at remote execution against `target`.
    pub fn set_remote_execution(&self, ctx: &mut ExecutionContext, target: RemoteTarget) {
        ctx.set_remote_target(target);
    }

    /// Enable the result cache (a no-op if it was already enabled).
    pub fn enable_cache(&self) {
        self.cache_enabled.store(true, Ordering::SeqCst);
    }

    /// Disable the result cache without discarding its contents — the
    /// next `enable_cache` call sees cached entries that haven't expired.
    pub fn disable_cache(&self) {
        self.cache_enabled.store(false, Ordering::SeqCst);
    }

    /// Drop every cached entry.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Snapshot of every recorded step so far, oldest first.
    pub async fn get_history(&self) -> Vec<ExecutionStep> {
        self.history.lock().await.steps().to_vec()
    }

    /// Clear the recorded history.
    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Request cancellation of whatever is currently executing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn backend_for(&self, ctx: &ExecutionContext) -> MancerResult<Arc<dyn ExecutionBackend>> {
        match ctx.mode() {
            ExecutionMode::Local => Ok(self.local_backend.clone() as Arc<dyn ExecutionBackend>),
            ExecutionMode::Remote => {
                let target = ctx.remote_target().ok_or_else(|| {
                    MancerError::BuilderError("remote mode set without a remote target".to_string())
                })?;
                let key = ctx.backend_key();
                let mut backends = self.remote_backends.lock().await;
                if let Some(existing) = backends.get(&key) {
                    return Ok(existing.clone() as Arc<dyn ExecutionBackend>);
                }
                let backend = Arc::new(RemoteBackend::connect(target.clone()).await?);
                backends.insert(key, backend.clone());
                Ok(backend as Arc<dyn ExecutionBackend>)
            }
        }
    }

    async fn resolve_version(&self, tool: &str, backend: &dyn ExecutionBackend, ctx: &ExecutionContext) -> Option<ToolVersion> {
        let backend_key = ctx.backend_key();
        if let Some(cached) = self.version_registry.get(tool, &backend_key) {
            return Some(cached);
        }
        let raw = backend.detect_version_output(tool, ctx.cwd()).await.ok()?;
        let version = parse_version(&raw)?;
        self.version_registry.put(tool, &backend_key, version.clone());
        Some(version)
    }

    /// Execute one `Command` against `ctx`, running the full pipeline
    /// spec §4.3 describes: cache lookup, version detection and parser
    /// resolution, backend dispatch, success-rule application, parsing,
    /// history recording, and cache population.
    ///
    /// Only `MancerError::BuilderError` escapes as `Err` here; backend
    /// faults (`BackendSpawnFailed`, `SshConnectFailed`, `Cancelled`,
    /// `Timeout`, ...) are caught and materialized into a `CommandResult`
    /// with `success: false` and `metadata["error_kind"]` set, per the
    /// propagation policy in spec §7.
    pub async fn execute_command(&self, command: &Command, ctx: &ExecutionContext) -> MancerResult<CommandResult> {
        let invocation = command.render(ctx)?;
        let backend_key = ctx.backend_key();
        let rendered_line = command.rendered_line();

        let cwd_string = ctx.cwd().to_string_lossy().into_owned();
        let env = ctx.env().clone();
        let key_input = CacheKeyInput {
            rendered_command: &rendered_line,
            backend_key: &backend_key,
            cwd: &cwd_string,
            env: &env,
            uid: current_uid(),
            input_data: invocation.stdin.as_deref(),
        };
        let fp = fingerprint(&key_input);
        let cache_active = self.cache_enabled.load(Ordering::SeqCst)
            && !command.is_no_cache()
            && !ctx.no_cache_requested();

        if cache_active {
            if let Some(cached) = self.cache.lock().await.get(&fp) {
                self.log.log(LogLevel::Debug, "cache hit", field("command", &rendered_line));
                let result = self.materialize_cache_hit(command, &rendered_line, ctx, cached).await;
                return Ok(result);
            }
        }

        let backend = self.backend_for(ctx).await?;
        let version = self.resolve_version(command.name(), backend.as_ref(), ctx).await;
        let started_at = Utc::now();

        let mut result = match backend.execute(&invocation, &self.cancel).await {
            Ok(mut raw) => {
                if let Some(version) = &version {
                    raw.metadata.insert("tool_version".to_string(), version.canonical());
                    if let Some(parser) = self.parser_registry.resolve(command.name(), version) {
                        match parser(&raw.stdout) {
                            Ok(rows) => raw.data = rows,
                            Err(e) => {
                                raw.metadata.insert("error_kind".to_string(), e.kind_tag().to_string());
                            }
                        }
                    }
                }
                if command.has_parser() {
                    match command.parse(&raw.stdout) {
                        Ok(rows) if !rows.is_empty() => raw.data = rows,
                        Ok(_) => {}
                        Err(e) => {
                            raw.metadata.insert("error_kind".to_string(), e.kind_tag().to_string());
                        }
                    }
                }
                raw.success = command.is_success(&raw);
                raw
            }
            Err(e) => {
                self.log.log(LogLevel::Error, "execution failed", field("error", e.to_string()));
                CommandResult::new(false, String::new(), e.to_string(), e.exit_code().as_i32())
                    .with_metadata("error_kind", e.kind_tag())
                    .with_metadata("cache_poison", e.is_cache_poison().to_string())
            }
        };
        let completed_at = Utc::now();

        let mut history = ExecutionHistory::new();
        history.append(Self::execution_step(
            command,
            &rendered_line,
            &result,
            started_at,
            completed_at,
            ctx,
            false,
        ));
        result.history = history;

        self.record_history(&result.history).await;

        if cache_active && !result.metadata.get("cache_poison").is_some_and(|v| v == "true") {
            self.cache.lock().await.put(fp, result.clone());
        }

        Ok(result)
    }

    /// Build the single `ExecutionStep` describing one `execute_command`
    /// call (spec §3).
    fn execution_step(
        command: &Command,
        rendered_line: &str,
        result: &CommandResult,
        started_at: chrono::DateTime<Utc>,
        completed_at: chrono::DateTime<Utc>,
        ctx: &ExecutionContext,
        cached: bool,
    ) -> ExecutionStep {
        ExecutionStep {
            step_id: 0,
            command_name: command.name().to_string(),
            command_string: rendered_line.to_string(),
            started_at,
            completed_at,
            exit_code: result.exit_code,
            success: result.success,
            output_excerpt: truncate_excerpt(&result.stdout),
            error_excerpt: truncate_excerpt(&result.stderr),
            data_format: result.data_format,
            structured_summary: StructuredSummary::from_rows(&result.data),
            context_snapshot: ctx.snapshot(),
            cached,
            op: "execute".to_string(),
        }
    }

    /// Produce the value returned for a cache hit: a deep clone of the
    /// cached result with a fresh, `cached: true` history step describing
    /// this invocation (spec §4.8) — the cached value's own original
    /// history is replaced rather than appended to, since a hit is itself
    /// one new execution as far as the caller is concerned.
    async fn materialize_cache_hit(
        &self,
        command: &Command,
        rendered_line: &str,
        ctx: &ExecutionContext,
        mut result: CommandResult,
    ) -> CommandResult {
        let now = Utc::now();
        let mut history = ExecutionHistory::new();
        history.append(Self::execution_step(command, rendered_line, &result, now, now, ctx, true));
        result.history = history;
        self.record_history(&result.history).await;
        result
    }

    async fn record_history(&self, history: &ExecutionHistory) {
        self.history.lock().await.merge(history);
    }

    /// Execute every link of `chain` in order, returning the final link's
    /// result (spec §4.4). `CommandChain::execute` takes a synchronous
    /// `FnMut` callback so non-orchestrator callers can drive it without
    /// an async executor; since every link here actually needs to run
    /// against a backend, the chain is driven link-by-link directly
    /// instead, re-deriving the same pipe/then stdin-plumbing rule
    /// `CommandChain::execute` applies.
    pub async fn execute_chain(&self, chain: &CommandChain, ctx: &ExecutionContext) -> MancerResult<CommandResult> {
        let mut working_ctx = ctx.deep_clone();
        let mut previous: Option<CommandResult> = None;
        let mut combined_history = ExecutionHistory::new();

        for (index, command) in chain.commands().enumerate() {
            if index == 0 || !chain.is_pipe_link(index) {
                working_ctx.set_parameter("input_data", serde_json::Value::Null);
            } else if let Some(prev) = &previous {
                working_ctx.set_parameter("input_data", prev.stdout.clone());
            }

            let result = self.execute_command(command, &working_ctx).await?;
            combined_history.merge(&result.history);
            previous = Some(result);
        }

        let mut final_result = previous.expect("a CommandChain always has at least one link");
        final_result.history = combined_history;
        Ok(final_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::registry::echo;
    use crate::logging::RecordingLog;

    fn test_config() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn test_execute_echo_locally() {
        let orchestrator = Orchestrator::with_log(&test_config(), Arc::new(RecordingLog::new())).unwrap();
        let ctx = ExecutionContext::new();
        let cmd = echo("hello").unwrap();
        let result = orchestrator.execute_command(&cmd, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_cache_hit_on_repeat_execution() {
        let orchestrator = Orchestrator::with_log(&test_config(), Arc::new(RecordingLog::new())).unwrap();
        let ctx = ExecutionContext::new();
        let cmd = echo("cached").unwrap();

        let first = orchestrator.execute_command(&cmd, &ctx).await.unwrap();
        assert!(!first.history.last().unwrap().cached);

        let second = orchestrator.execute_command(&cmd, &ctx).await.unwrap();
        assert!(second.history.last().unwrap().cached);
        assert_eq!(second.stdout, first.stdout);
    }

    #[tokio::test]
    async fn test_history_accumulates() {
        let orchestrator = Orchestrator::with_log(&test_config(), Arc::new(RecordingLog::new())).unwrap();
        let ctx = ExecutionContext::new();
        orchestrator.execute_command(&echo("a").unwrap(), &ctx).await.unwrap();
        orchestrator.execute_command(&echo("b").unwrap(), &ctx).await.unwrap();

        let history = orchestrator.get_history().await;
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_disable_cache_forces_recompute() {
        let orchestrator = Orchestrator::with_log(&test_config(), Arc::new(RecordingLog::new())).unwrap();
        orchestrator.disable_cache();
        let ctx = ExecutionContext::new();
        let cmd = echo("x").unwrap();
        orchestrator.execute_command(&cmd, &ctx).await.unwrap();
        let second = orchestrator.execute_command(&cmd, &ctx).await.unwrap();
        assert!(!second.history.last().unwrap().cached);
    }

    #[tokio::test]
    async fn test_execute_command_history_has_exactly_one_step() {
        let orchestrator = Orchestrator::with_log(&test_config(), Arc::new(RecordingLog::new())).unwrap();
        let ctx = ExecutionContext::new();
        let result = orchestrator.execute_command(&echo("solo").unwrap(), &ctx).await.unwrap();
        assert_eq!(result.history.len(), 1);
        assert_eq!(result.history.last().unwrap().command_name, "echo");
    }

    #[tokio::test]
    async fn test_spawn_failure_materializes_as_failed_result_not_err() {
        let orchestrator = Orchestrator::with_log(&test_config(), Arc::new(RecordingLog::new())).unwrap();
        let ctx = ExecutionContext::new();
        let cmd = Command::new("definitely-not-a-real-binary-xyz").unwrap();
        let result = orchestrator.execute_command(&cmd, &ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.metadata.get("error_kind").map(String::as_str), Some("BackendSpawnFailed"));
    }
}
