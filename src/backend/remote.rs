//! # Remote (SSH) Execution Backend
//!
//! Runs invocations on a remote host over SSH via the `openssh` crate,
//! which shells out to the system `ssh` binary and multiplexes commands
//! over one control-master connection. No example in the teacher corpus
//! carries a production SSH client dependency (the closest analogue,
//! `opereon-opereon`'s `RemoteCommandOperation`, is a pre-`async`/`await`
//! futures-0.1 command runner kept only as domain grounding — see
//! DESIGN.md) so `openssh` was adopted directly for this backend; every
//! other dependency in this crate still traces back to the teacher or a
//! sibling example.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::backend::{CancellationToken, ExecutionBackend, Invocation};
use crate::context::{KnownHostsPolicy, RemoteTarget};
use crate::error::{MancerError, MancerResult};
use crate::result::CommandResult;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn map_known_hosts(policy: KnownHostsPolicy) -> KnownHosts {
    match policy {
        KnownHostsPolicy::Strict => KnownHosts::Strict,
        KnownHostsPolicy::Warn => KnownHosts::Accept,
        KnownHostsPolicy::AcceptNew => KnownHosts::Add,
        KnownHostsPolicy::Off => KnownHosts::Accept,
    }
}

/// Executes invocations on a single remote host over SSH.
///
/// One `RemoteBackend` owns one multiplexed `Session`; `Orchestrator`
/// keeps one instance per distinct `RemoteTarget` it has dispatched to,
/// mirroring `LocalBackend` being a single long-lived instance rather than
/// reconnecting per command.
pub struct RemoteBackend {
    session: Session,
    target: RemoteTarget,
}

impl RemoteBackend {
    /// Open the SSH session described by `target`, trying auth methods in
    /// the order spec §3 specifies: an explicit key, then the local
    /// agent, then an interactive password (handled by the underlying
    /// `ssh` binary's own fallback chain — `openssh` does not let this
    /// crate intercept individual auth attempts, only configure which are
    /// offered via `IdentitiesOnly` and `BatchMode`).
    pub async fn connect(target: RemoteTarget) -> MancerResult<Self> {
        let mut builder = SessionBuilder::default();
        builder
            .known_hosts_check(map_known_hosts(target.known_hosts_policy))
            .user(target.user.clone())
            .port(target.port);

        if let Some(key) = &target.key_path {
            builder.keyfile(key);
        }
        if let Some(cert) = &target.certificate_path {
            builder.config_option("CertificateFile", cert.display().to_string());
        }
        if target.identity_only {
            builder.config_option("IdentitiesOnly", "yes");
        }
        if target.agent_forwarding {
            builder.config_option("ForwardAgent", "yes");
        }
        if target.gssapi {
            builder.config_option("GSSAPIAuthentication", "yes");
        }
        for (key, value) in &target.ssh_options {
            builder.config_option(key, value);
        }

        let session = builder.connect(&target.host).await.map_err(|e| {
            let message = e.to_string();
            if message.to_lowercase().contains("permission denied")
                || message.to_lowercase().contains("authentication")
            {
                MancerError::SshAuthFailed(message)
            } else {
                MancerError::SshConnectFailed(message)
            }
        })?;

        Ok(Self { session, target })
    }

    fn wrap_for_sudo(&self, invocation: &Invocation) -> (String, Vec<String>, Option<String>) {
        wrap_for_sudo(&self.target, invocation)
    }
}

/// Prefix `invocation` with `sudo -S -p ''` and splice the sudo password
/// onto the front of its stdin when `target.use_sudo` is set. Free
/// function (rather than a `RemoteBackend` method) so it can be unit
/// tested without an open SSH session.
fn wrap_for_sudo(target: &RemoteTarget, invocation: &Invocation) -> (String, Vec<String>, Option<String>) {
    if !target.use_sudo {
        return (
            invocation.program.clone(),
            invocation.args.clone(),
            invocation.stdin.clone(),
        );
    }

    let mut args = vec!["-S".to_string(), "-p".to_string(), String::new()];
    args.push(invocation.program.clone());
    args.extend(invocation.args.iter().cloned());

    let mut stdin = target
        .sudo_password
        .clone()
        .map(|p| format!("{p}\n"))
        .unwrap_or_default();
    if let Some(existing) = &invocation.stdin {
        stdin.push_str(existing);
    }

    ("sudo".to_string(), args, Some(stdin))
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    async fn execute(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> MancerResult<CommandResult> {
        let (program, args, stdin) = self.wrap_for_sudo(invocation);

        let mut command = self.session.command(&program);
        command.args(&args);
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command
            .spawn()
            .await
            .map_err(|e| MancerError::BackendSpawnFailed(e.to_string()))?;

        if let Some(data) = &stdin {
            if let Some(mut child_stdin) = child.stdin().take() {
                let _ = child_stdin.write_all(data.as_bytes()).await;
            }
        }

        let stdout = child.stdout().take().expect("stdout was piped");
        let stderr = child.stderr().take().expect("stderr was piped");

        let live = invocation.live_output;
        let stdout_task = tokio::spawn(collect_stream(stdout, live, false));
        let stderr_task = tokio::spawn(collect_stream(stderr, live, true));

        let deadline = invocation.timeout.map(|t| Instant::now() + t);

        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Err(MancerError::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
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

        let exit_code = status.code().unwrap_or(-1);

        if self.target.use_sudo && exit_code != 0 && stderr_text.to_lowercase().contains("sorry") {
            return Err(MancerError::SudoAuthFailed(stderr_text));
        }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RemoteTarget;
    use std::path::PathBuf;

    #[test]
    fn test_known_hosts_mapping() {
        assert!(matches!(
            map_known_hosts(KnownHostsPolicy::Strict),
            KnownHosts::Strict
        ));
        assert!(matches!(
            map_known_hosts(KnownHostsPolicy::AcceptNew),
            KnownHosts::Add
        ));
    }

    #[test]
    fn test_sudo_wrapping_prepends_flags_and_feeds_password() {
        let mut target = RemoteTarget::new("host", "user", 22);
        target.use_sudo = true;
        target.sudo_password = Some("hunter2".to_string());

        let invocation =
            Invocation::new("systemctl", vec!["restart".to_string(), "nginx".to_string()], PathBuf::from("/"));
        let (program, args, stdin) = wrap_for_sudo(&target, &invocation);

        assert_eq!(program, "sudo");
        assert_eq!(args[0], "-S");
        assert_eq!(args[3], "systemctl");
        assert_eq!(stdin.unwrap(), "hunter2\n");
    }

    #[test]
    fn test_no_sudo_passes_through_unchanged() {
        let target = RemoteTarget::new("host", "user", 22);
        let invocation = Invocation::new("ls", vec!["-la".to_string()], PathBuf::from("/"));
        let (program, args, stdin) = wrap_for_sudo(&target, &invocation);

        assert_eq!(program, "ls");
        assert_eq!(args, vec!["-la".to_string()]);
        assert!(stdin.is_none());
    }
}
