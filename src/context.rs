//! # Execution Context
//!
//! `ExecutionContext` is the ambient, clonable state threaded through every
//! execution (spec §3, §4.2): working directory, environment, free-form
//! parameters used for cross-command signaling, and the execution mode
//! (local or remote). Modeled after the teacher's
//! `bootstrap_v2::context::Context`, but mutable-by-clone rather than
//! `Arc`-shared: chain composition always clones before propagating so a
//! chain can never mutate a caller's context (spec §4.2).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Host-key verification policy for `RemoteBackend` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KnownHostsPolicy {
    /// Reject unknown or changed host keys outright.
    #[default]
    Strict,
    /// Accept but warn about unknown host keys.
    Warn,
    /// Silently accept and persist new host keys.
    AcceptNew,
    /// Perform no host-key verification at all.
    Off,
}

impl KnownHostsPolicy {
    /// Parse the `ssh.known_hosts_policy` config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(Self::Strict),
            "warn" => Some(Self::Warn),
            "accept-new" => Some(Self::AcceptNew),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

/// Target host and credentials for `RemoteBackend` (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTarget {
    /// Remote hostname or address.
    pub host: String,
    /// Remote login user.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// Path to a private key file, if using key auth.
    pub key_path: Option<PathBuf>,
    /// Password for password auth (never logged).
    pub password: Option<String>,
    /// Passphrase protecting `key_path`, if any.
    pub passphrase: Option<String>,
    /// Whether commands should be wrapped in `sudo -S -p ''`.
    pub use_sudo: bool,
    /// Password fed to sudo's stdin prompt.
    pub sudo_password: Option<String>,
    /// Restrict authentication to the configured key only (skip agent/password).
    pub identity_only: bool,
    /// Whether to forward the local SSH agent.
    pub agent_forwarding: bool,
    /// Whether to attempt GSSAPI authentication.
    pub gssapi: bool,
    /// Extra raw `ssh_config`-style options (`StrictHostKeyChecking`, etc).
    pub ssh_options: HashMap<String, String>,
    /// Host-key verification policy.
    pub known_hosts_policy: KnownHostsPolicy,
    /// Path to a certificate file for certificate-based auth.
    pub certificate_path: Option<PathBuf>,
}

impl RemoteTarget {
    /// Construct a target with the minimum required fields and every
    /// optional field at its default (strict host-key checking, no sudo).
    pub fn new(host: impl Into<String>, user: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port,
            key_path: None,
            password: None,
            passphrase: None,
            use_sudo: false,
            sudo_password: None,
            identity_only: false,
            agent_forwarding: false,
            gssapi: false,
            ssh_options: HashMap::new(),
            known_hosts_policy: KnownHostsPolicy::Strict,
            certificate_path: None,
        }
    }

    /// `user@host` as used in fingerprints and log fields.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Which backend an `ExecutionContext` dispatches to (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Run against `LocalBackend`.
    #[default]
    Local,
    /// Run against `RemoteBackend`.
    Remote,
}

/// A point-in-time copy of the ambient state an `ExecutionStep` records
/// alongside its outcome (spec §3) — cheap enough to snapshot on every
/// execution, unlike cloning the full `ExecutionContext` (which also
/// carries credentials).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Working directory at the time of execution.
    pub cwd: PathBuf,
    /// Local or remote.
    pub mode: ExecutionMode,
    /// Remote hostname, if `mode == Remote`.
    pub host: Option<String>,
}

/// The ambient, clonable state of a single execution (spec §3).
///
/// Invariant: `mode == ExecutionMode::Remote` implies `remote_target` is
/// `Some`. This is enforced by `set_mode`/`set_remote_target` and checked
/// again by the backend dispatch in `Command::execute`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cwd: PathBuf,
    env: HashMap<String, String>,
    parameters: HashMap<String, Value>,
    mode: ExecutionMode,
    remote_target: Option<RemoteTarget>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Construct a context defaulting to the process's current working
    /// directory and local execution mode.
    pub fn new() -> Self {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            cwd,
            env: HashMap::new(),
            parameters: HashMap::new(),
            mode: ExecutionMode::Local,
            remote_target: None,
        }
    }

    /// Construct a context targeting a remote host from the start.
    pub fn remote(target: RemoteTarget) -> Self {
        let mut ctx = Self::new();
        ctx.mode = ExecutionMode::Remote;
        ctx.remote_target = Some(target);
        ctx
    }

    /// Current working directory commands run in.
    pub fn cwd(&self) -> &PathBuf {
        &self.cwd
    }

    /// Set the working directory. Builder-style: mutates in place and
    /// returns `self`, matching the teacher's setter convention
    /// (`bootstrap_v2::context` setters); callers needing isolation must
    /// `clone()` first (spec §4.2).
    pub fn set_cwd(&mut self, cwd: impl Into<PathBuf>) -> &mut Self {
        self.cwd = cwd.into();
        self
    }

    /// Environment variables visible to the executed command.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Set a single environment variable.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Cross-command signaling parameters (`input_data`, `live_output`,
    /// `interval`, `timeout_seconds`, `no_cache`, ...).
    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    /// Set a parameter to an arbitrary JSON-representable value.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Read a parameter back as a string, if present and string-typed.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Read a parameter back as `f64`, if present and numeric.
    pub fn parameter_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    /// Read a parameter back as `bool`, if present and boolean.
    pub fn parameter_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }

    /// Execution mode (local or remote).
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Switch to local execution, dropping any remote target.
    pub fn set_local_mode(&mut self) -> &mut Self {
        self.mode = ExecutionMode::Local;
        self.remote_target = None;
        self
    }

    /// Switch to remote execution against `target`.
    pub fn set_remote_target(&mut self, target: RemoteTarget) -> &mut Self {
        self.mode = ExecutionMode::Remote;
        self.remote_target = Some(target);
        self
    }

    /// The configured remote target, if any.
    pub fn remote_target(&self) -> Option<&RemoteTarget> {
        self.remote_target.as_ref()
    }

    /// A stable string identifying the backend+destination pair this
    /// context would dispatch to, used in cache fingerprints and version
    /// registry keys (spec §4.3 step 2, §4.8).
    pub fn backend_key(&self) -> String {
        match (&self.mode, &self.remote_target) {
            (ExecutionMode::Local, _) => "local".to_string(),
            (ExecutionMode::Remote, Some(target)) => {
                format!("remote:{}:{}", target.destination(), target.port)
            }
            (ExecutionMode::Remote, None) => "remote:unconfigured".to_string(),
        }
    }

    /// A `ContextSnapshot` capturing cwd/mode/host at this instant, for
    /// embedding in an `ExecutionStep` (spec §3).
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            cwd: self.cwd.clone(),
            mode: self.mode,
            host: self.remote_target.as_ref().map(|t| t.host.clone()),
        }
    }

    /// Deep-clone of this context. `Clone` already does this (there is no
    /// shared mutable state inside `ExecutionContext`); this method exists
    /// to make the invariant from spec §3 ("clone() produces a deep copy")
    /// explicit at call sites like chain composition.
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }

    /// `timeout_seconds` parameter, if set (spec §5).
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.parameter_f64("timeout_seconds")
            .map(std::time::Duration::from_secs_f64)
    }

    /// Whether `context.parameters["no_cache"]` disables caching for this
    /// execution regardless of the command's own `no_cache` flag (spec §4.8).
    pub fn no_cache_requested(&self) -> bool {
        self.parameter_bool("no_cache").unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_local() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.mode(), ExecutionMode::Local);
        assert!(ctx.remote_target().is_none());
        assert_eq!(ctx.backend_key(), "local");
    }

    #[test]
    fn test_remote_target_invariant() {
        let target = RemoteTarget::new("example.com", "deploy", 22);
        let ctx = ExecutionContext::remote(target.clone());
        assert_eq!(ctx.mode(), ExecutionMode::Remote);
        assert_eq!(ctx.remote_target(), Some(&target));
        assert_eq!(ctx.backend_key(), "remote:deploy@example.com:22");
    }

    #[test]
    fn test_clone_is_deep_and_independent() {
        let mut ctx1 = ExecutionContext::new();
        ctx1.set_env("FOO", "bar");
        let mut ctx2 = ctx1.clone();
        ctx2.set_env("FOO", "baz");

        assert_eq!(ctx1.env().get("FOO"), Some(&"bar".to_string()));
        assert_eq!(ctx2.env().get("FOO"), Some(&"baz".to_string()));
    }

    #[test]
    fn test_parameter_round_trip() {
        let mut ctx = ExecutionContext::new();
        ctx.set_parameter("input_data", "hello");
        ctx.set_parameter("interval", 0.5);
        ctx.set_parameter("live_output", true);

        assert_eq!(ctx.parameter_str("input_data"), Some("hello"));
        assert_eq!(ctx.parameter_f64("interval"), Some(0.5));
        assert_eq!(ctx.parameter_bool("live_output"), Some(true));
    }

    #[test]
    fn test_known_hosts_policy_parse() {
        assert_eq!(
            KnownHostsPolicy::parse("accept-new"),
            Some(KnownHostsPolicy::AcceptNew)
        );
        assert_eq!(KnownHostsPolicy::parse("bogus"), None);
        assert_eq!(KnownHostsPolicy::default(), KnownHostsPolicy::Strict);
    }

    #[test]
    fn test_snapshot_captures_remote_host() {
        let ctx = ExecutionContext::remote(RemoteTarget::new("example.com", "deploy", 22));
        let snap = ctx.snapshot();
        assert_eq!(snap.mode, ExecutionMode::Remote);
        assert_eq!(snap.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_set_remote_target_switches_mode() {
        let mut ctx = ExecutionContext::new();
        ctx.set_remote_target(RemoteTarget::new("h", "u", 22));
        assert_eq!(ctx.mode(), ExecutionMode::Remote);

        ctx.set_local_mode();
        assert_eq!(ctx.mode(), ExecutionMode::Local);
        assert!(ctx.remote_target().is_none());
    }
}
