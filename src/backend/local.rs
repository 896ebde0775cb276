//! # Local Execution Backend
//!
//! Runs invocations as direct child processes of the `mancer` process
//! itself. The spawn/capture/cancel shape is a direct generalization of
//! the teacher's `safe_run::execute`: stdout/stderr captured on separate
//! tasks, a `try_wait` polling loop rather than a blocking `wait`, and
//! `signal-hook`-registered SIGINT/SIGTERM flipping the same cancellation
//! flag a caller can also flip programmatically (spec §5).

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::backend::{CancellationToken, ExecutionBackend, Invocation};
use crate::error::{MancerError, MancerResult};
use crate::result::CommandResult;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Executes invocations as local child processes.
pub struct LocalBackend {
    /// Flipped by the process's SIGINT/SIGTERM handlers, in addition to
    /// whatever `CancellationToken` a caller passes to `execute`.
    signal_received: Arc<AtomicBool>,
}

impl LocalBackend {
    /// Register SIGINT/SIGTERM handlers and construct a backend that
    /// honors them for every execution it runs.
    pub fn new() -> MancerResult<Self> {
        let signal_received = Arc::new(AtomicBool::new(false));
        flag::register(SIGTERM, Arc::clone(&signal_received))
            .map_err(|e| MancerError::BackendSpawnFailed(format!("SIGTERM handler: {e}")))?;
        flag::register(SIGINT, Arc::clone(&signal_received))
            .map_err(|e| MancerError::BackendSpawnFailed(format!("SIGINT handler: {e}")))?;
        Ok(Self { signal_received })
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new().expect("failed to register local backend signal handlers")
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    async fn execute(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> MancerResult<CommandResult> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command
            .spawn()
            .map_err(|e| MancerError::BackendSpawnFailed(e.to_string()))?;

        if let Some(data) = &invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(data.as_bytes()).await;
            }
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let live = invocation.live_output;
        let stdout_task = tokio::spawn(collect_stream(stdout, live, false));
        let stderr_task = tokio::spawn(collect_stream(stderr, live, true));

        let deadline = invocation.timeout.map(|t| Instant::now() + t);

        let exit_status = loop {
            if cancel.is_cancelled() || self.signal_received.load(Ordering::SeqCst) {
                let _ = child.kill().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Err(MancerError::Cancelled);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let _ = child.kill().await;
                    let _ = stdout_task.await;
                    let _ = stderr_task.await;
                    return Err(MancerError::Timeout(invocation.timeout.unwrap_or_default()));
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => return Err(MancerError::BackendSpawnFailed(e.to_string())),
            }
        };

        let stdout_text = stdout_task
            .await
            .map_err(|e| MancerError::BackendSpawnFailed(format!("stdout capture task: {e}")))?;
        let stderr_text = stderr_task
            .await
            .map_err(|e| MancerError::BackendSpawnFailed(format!("stderr capture task: {e}")))?;

        let exit_code = exit_status.code().unwrap_or(-1);
        Ok(CommandResult::new(
            exit_code == 0,
            stdout_text,
            stderr_text,
            exit_code,
        ))
    }
}

async fn collect_stream<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    live: bool,
    is_stderr: bool,
) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut buf = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if live {
            if is_stderr {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }
        buf.push_str(&line);
        buf.push('\n');
    }
    buf
}

#[allow(dead_code)]
async fn read_all(mut reader: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn invocation(program: &str, args: Vec<&str>) -> Invocation {
        Invocation::new(
            program,
            args.into_iter().map(String::from).collect(),
            PathBuf::from("."),
        )
    }

    #[tokio::test]
    async fn test_echo_succeeds() {
        let backend = LocalBackend::new().unwrap();
        let inv = invocation("echo", vec!["hello"]);
        let result = backend
            .execute(&inv, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let backend = LocalBackend::new().unwrap();
        let inv = invocation("sh", vec!["-c", "exit 3"]);
        let result = backend
            .execute(&inv, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let backend = LocalBackend::new().unwrap();
        let inv = invocation("definitely-not-a-real-binary-xyz", vec![]);
        let result = backend.execute(&inv, &CancellationToken::new()).await;
        assert!(matches!(result, Err(MancerError::BackendSpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let backend = LocalBackend::new().unwrap();
        let inv = invocation("sleep", vec!["5"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = backend.execute(&inv, &cancel).await;
        assert!(matches!(result, Err(MancerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_stdin_is_piped_through() {
        let backend = LocalBackend::new().unwrap();
        let mut inv = invocation("cat", vec![]);
        inv.stdin = Some("piped input\n".to_string());
        let result = backend
            .execute(&inv, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.stdout, "piped input\n");
    }
}
