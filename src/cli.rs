//! # CLI Interface
//!
//! Command-line surface for the `mancer` binary: `run` executes one
//! command through the orchestrator, `history` replays the last few
//! recorded steps from the on-disk history log, and `version` prints the
//! tool version. Structured the way the teacher's `cli.rs` is: one
//! `Cli`/`Commands` pair parsed with clap's derive API, dispatched from a
//! `Cli::run(&self) -> Result<i32, String>` method `main.rs` maps onto a
//! process exit code.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigProvider, YamlFileConfigProvider};
use crate::context::{ExecutionContext, RemoteTarget};
use crate::history::ExecutionStep;
use crate::logging::{init_tracing, TracingLog};
use crate::orchestrator::Orchestrator;
use crate::result::DataFormat;

/// Package version from Cargo.toml.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `mancer`: build, compose, and run shell commands locally or over SSH.
#[derive(Parser)]
#[command(name = "mancer")]
#[command(version = VERSION)]
#[command(about = "Command orchestration engine with structured, version-aware output")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single command through the orchestrator.
    Run(RunArgs),
    /// Show recently executed steps from the on-disk history log.
    History(HistoryArgs),
    /// Print the tool version.
    Version,
}

/// Output format requested for a `run` invocation's structured data.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    List,
    Table,
    Json,
}

impl From<FormatArg> for DataFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::List => DataFormat::List,
            FormatArg::Table => DataFormat::Table,
            FormatArg::Json => DataFormat::Json,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Program and arguments to run, passed through without shell
    /// interpretation. Use `--` before flags that would otherwise be
    /// parsed by `mancer` itself.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Run over SSH instead of locally, as `user@host[:port]`.
    #[arg(long, env = "MANCER_REMOTE")]
    remote: Option<String>,

    /// Private key path for the remote connection.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Wrap the remote command in `sudo`, reading the password from
    /// `MANCER_SUDO_PASSWORD`.
    #[arg(long)]
    sudo: bool,

    /// Stream stdout/stderr as they're produced instead of only at the end.
    #[arg(long)]
    live: bool,

    /// Seconds before the execution is cancelled.
    #[arg(long)]
    timeout: Option<f64>,

    /// Bypass the result cache for this invocation.
    #[arg(long)]
    no_cache: bool,

    /// Structured-data format to print alongside stdout.
    #[arg(long, value_enum, default_value = "list")]
    format: FormatArg,

    /// Path to the YAML config file (overridden by `MANCER_CONFIG_PATH`).
    #[arg(long, global = true, default_value = "mancer.yaml")]
    config: PathBuf,
}

#[derive(Args)]
struct HistoryArgs {
    /// Number of most recent steps to show.
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

/// On-disk history log record — a thin projection of `ExecutionStep`
/// persisted across invocations, since each `mancer run` is its own
/// process and `Orchestrator::get_history` only covers one process's
/// lifetime.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryLog {
    steps: Vec<ExecutionStep>,
}

fn history_log_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mancer")
        .join("history.json")
}

fn append_to_history_log(steps: &[ExecutionStep]) -> std::io::Result<()> {
    let path = history_log_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut log = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).unwrap_or(HistoryLog { steps: Vec::new() })
    } else {
        HistoryLog { steps: Vec::new() }
    };

    log.steps.extend_from_slice(steps);
    let raw = serde_json::to_string_pretty(&log)?;
    std::fs::write(&path, raw)
}

fn read_history_log() -> Vec<ExecutionStep> {
    let path = history_log_path();
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|raw| serde_json::from_str::<HistoryLog>(&raw).ok())
        .map(|log| log.steps)
        .unwrap_or_default()
}

/// `user@host[:port]` → `(user, host, port)`, defaulting the port to 22
/// and the user to the current process's user (spec §3).
fn parse_remote_spec(spec: &str) -> Result<(String, String, u16), String> {
    let (user, rest) = spec
        .split_once('@')
        .map(|(u, r)| (u.to_string(), r))
        .unwrap_or_else(|| (whoami_fallback(), spec));

    let (host, port) = match rest.split_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>().map_err(|_| format!("invalid port in remote spec: {spec}"))?,
        ),
        None => (rest.to_string(), 22),
    };

    if host.is_empty() {
        return Err(format!("missing host in remote spec: {spec}"));
    }
    Ok((user, host, port))
}

fn whoami_fallback() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

impl Cli {
    /// Dispatch the parsed command. Returns the process exit code on
    /// success and a human-readable message on tool-level failure (spec
    /// §6's exit code contract is enforced by `main.rs` from there).
    pub fn run(&self) -> Result<i32, String> {
        match &self.command {
            Some(Commands::Run(args)) => Self::run_command(args),
            Some(Commands::History(args)) => Self::history_command(args),
            Some(Commands::Version) | None => {
                println!("mancer {VERSION}");
                Ok(0)
            }
        }
    }

    fn run_command(args: &RunArgs) -> Result<i32, String> {
        let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
        runtime.block_on(Self::run_command_async(args))
    }

    async fn run_command_async(args: &RunArgs) -> Result<i32, String> {
        let config = YamlFileConfigProvider::new(args.config.clone())
            .load()
            .map_err(|e| e.to_string())?
            .apply_env_overlay();

        init_tracing(&config.logging.level);

        let orchestrator =
            Orchestrator::with_log(&config, Arc::new(TracingLog)).map_err(|e| e.to_string())?;

        let mut ctx = ExecutionContext::new();
        if let Some(spec) = &args.remote {
            let (user, host, port) = parse_remote_spec(spec)?;
            let mut target = RemoteTarget::new(host, user, port);
            target.key_path = args.key.clone();
            target.use_sudo = args.sudo;
            target.sudo_password = std::env::var("MANCER_SUDO_PASSWORD").ok();
            target.known_hosts_policy = config.ssh.known_hosts_policy;
            ctx.set_remote_target(target);
        }

        ctx.set_parameter("live_output", args.live);
        if args.no_cache {
            ctx.set_parameter("no_cache", true);
        }
        if let Some(timeout) = args.timeout {
            ctx.set_parameter("timeout_seconds", timeout);
        }

        let (name, rest) = args
            .command
            .split_first()
            .ok_or_else(|| "no command given".to_string())?;
        let command = orchestrator
            .create_command(name.clone())
            .map_err(|e| e.to_string())?
            .args_extend(rest.iter().cloned());

        let result = orchestrator
            .execute_command(&command, &ctx)
            .await
            .map_err(|e| e.to_string())?;

        print!("{}", result.stdout);
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }

        let format: DataFormat = args.format.into();
        if format != DataFormat::List {
            let converted = result.to_format(format);
            if converted.success {
                println!("{:?}", converted.structured_output);
            } else {
                eprintln!("{}", converted.metadata.get("error_message").cloned().unwrap_or_default());
            }
        }

        let steps = orchestrator.get_history().await;
        let _ = append_to_history_log(&steps);

        Ok(if result.success { 0 } else { result.exit_code.max(1) })
    }

    fn history_command(args: &HistoryArgs) -> Result<i32, String> {
        let steps = read_history_log();
        let start = steps.len().saturating_sub(args.limit);
        for step in &steps[start..] {
            println!(
                "[{}] {} -> {}",
                step.completed_at.to_rfc3339(),
                step.command_string,
                if step.success { "ok" } else { "failed" }
            );
        }
        Ok(0)
    }
}
