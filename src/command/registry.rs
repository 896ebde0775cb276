//! # Builtin Command Registry
//!
//! Concrete, ready-to-use `Command`s for the tools spec §8's scenarios
//! exercise, plus a name-keyed `CommandRegistry` callers can extend with
//! their own. Mirrors the teacher's `bootstrap_v2::installers::mod`
//! (`InstallerRegistry`: a `HashMap<&'static str, Arc<dyn Installer>>`
//! with `register`/`get`), generalized from "one installer per tool" to
//! "one or more prebuilt `Command`s per tool".

use std::collections::HashMap;

use crate::command::parsers::{parse_grep_output, parse_kv_lines, parse_whitespace_table};
use crate::command::Command;
use crate::error::MancerResult;

/// `echo` with arguments passed straight through.
pub fn echo(text: impl Into<String>) -> MancerResult<Command> {
    Ok(Command::new("echo")?.arg(text).pipe_compatible(false))
}

/// `ls -la` style directory listing.
pub fn ls(path: impl Into<String>) -> MancerResult<Command> {
    Ok(Command::new("ls")?.arg("-la").arg(path))
}

/// `df -h`, parsed into per-filesystem rows.
pub fn df() -> MancerResult<Command> {
    Ok(Command::new("df")?
        .arg("-h")
        .parser(|out| parse_whitespace_table(out))
        .no_cache(true))
}

/// `grep [-n] pattern`, with "no match" (exit 1) treated as success —
/// only exit codes ≥ 2 (usage errors, unreadable files) count as a
/// failed search (spec §4.1's canonical success-override example).
pub fn grep(pattern: impl Into<String>, with_line_numbers: bool) -> MancerResult<Command> {
    let mut cmd = Command::new("grep")?;
    if with_line_numbers {
        cmd = cmd.arg("-n");
    }
    Ok(cmd
        .arg(pattern)
        .pipe_compatible(true)
        .success_override(|r| r.exit_code == 0 || r.exit_code == 1)
        .parser(|out| parse_grep_output(out)))
}

/// `systemctl <action> <unit>`.
pub fn systemctl(action: impl Into<String>, unit: impl Into<String>) -> MancerResult<Command> {
    Ok(Command::new("systemctl")?.arg(action).arg(unit))
}

/// `systemctl show <unit>`, parsed into `{key, value}` rows.
pub fn systemctl_show(unit: impl Into<String>) -> MancerResult<Command> {
    Ok(Command::new("systemctl")?
        .arg("show")
        .arg(unit)
        .parser(|out| parse_kv_lines(out))
        .no_cache(true))
}

/// `ps aux`, parsed into per-process rows.
pub fn ps() -> MancerResult<Command> {
    Ok(Command::new("ps")?
        .arg("aux")
        .parser(|out| parse_whitespace_table(out))
        .no_cache(true))
}

/// `wc -l`, pipe-compatible so it can sit downstream of `grep`/`cat`.
pub fn wc_lines() -> MancerResult<Command> {
    Ok(Command::new("wc")?.arg("-l").pipe_compatible(true))
}

/// `cat`, reading whichever files are passed (or stdin if none).
pub fn cat(paths: Vec<String>) -> MancerResult<Command> {
    Ok(Command::new("cat")?.args_extend(paths).pipe_compatible(true))
}

/// `hostname`.
pub fn hostname() -> MancerResult<Command> {
    Command::new("hostname")
}

/// `head -n <count>`.
pub fn head(count: u32) -> MancerResult<Command> {
    Ok(Command::new("head")?
        .arg("-n")
        .arg(count.to_string())
        .pipe_compatible(true))
}

/// `tail -n <count>`.
pub fn tail(count: u32) -> MancerResult<Command> {
    Ok(Command::new("tail")?
        .arg("-n")
        .arg(count.to_string())
        .pipe_compatible(true))
}

/// Name-keyed table of `Command` factories, for callers that want to look
/// up a builtin by a string name (e.g. the `mancer run <builtin>` CLI
/// path) instead of calling the constructor function directly.
#[derive(Default)]
pub struct CommandRegistry {
    factories: HashMap<String, fn() -> MancerResult<Command>>,
}

impl CommandRegistry {
    /// Construct a registry preloaded with the argument-free builtins
    /// (`df`, `ps`, `hostname`, `wc_lines`). Commands that require
    /// arguments (`grep`, `systemctl`, ...) are looked up by calling their
    /// constructor functions directly rather than through this table.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register("df", df);
        registry.register("ps", ps);
        registry.register("hostname", hostname);
        registry.register("wc_lines", wc_lines);
        registry
    }

    /// Register a zero-argument builtin factory under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: fn() -> MancerResult<Command>) {
        self.factories.insert(name.into(), factory);
    }

    /// Build a fresh `Command` from the factory registered under `name`.
    pub fn build(&self, name: &str) -> Option<MancerResult<Command>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Names of every registered builtin.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grep_rendered_line() {
        let cmd = grep("TODO", true).unwrap();
        assert_eq!(cmd.rendered_line(), "grep -n TODO");
        assert!(cmd.is_pipe_compatible());
    }

    #[test]
    fn test_grep_no_match_is_success() {
        let cmd = grep("TODO", false).unwrap();
        let result = crate::result::CommandResult::new(false, "", "", 1);
        assert!(cmd.is_success(&result));
        let usage_error = crate::result::CommandResult::new(false, "", "", 2);
        assert!(!cmd.is_success(&usage_error));
    }

    #[test]
    fn test_df_is_no_cache() {
        assert!(df().unwrap().is_no_cache());
    }

    #[test]
    fn test_registry_defaults_present() {
        let registry = CommandRegistry::with_defaults();
        assert!(registry.build("df").is_some());
        assert!(registry.build("nonexistent").is_none());
        assert!(registry.names().contains(&"ps"));
    }

    #[test]
    fn test_head_tail_are_pipe_compatible() {
        assert!(head(10).unwrap().is_pipe_compatible());
        assert!(tail(5).unwrap().is_pipe_compatible());
        assert_eq!(head(10).unwrap().rendered_line(), "head -n 10");
    }
}
