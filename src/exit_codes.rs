//! # Exit Code Constants
//!
//! Maps the `MancerError` taxonomy (`error.rs`) onto the process exit codes
//! documented for the `mancer` CLI (spec §6).

/// Process exit codes for the `mancer` CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success (0)
    Success = 0,

    /// Builder error: invalid command shape (126)
    BuilderError = 126,

    /// Backend spawn failed (127)
    BackendSpawnFailed = 127,

    /// Timeout expired (124)
    Timeout = 124,

    /// SSH connection failed (255)
    SshConnectFailed = 255,

    /// Mirrors the executed child's own exit code (1-125); used as a
    /// sentinel when the caller should read `CommandResult::exit_code`
    /// directly rather than a fixed constant.
    ChildExitCode = -1,
}

impl ExitCode {
    /// Convert to the `i32` passed to `std::process::exit`.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::BuilderError.as_i32(), 126);
        assert_eq!(ExitCode::BackendSpawnFailed.as_i32(), 127);
        assert_eq!(ExitCode::Timeout.as_i32(), 124);
        assert_eq!(ExitCode::SshConnectFailed.as_i32(), 255);
    }
}
