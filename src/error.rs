//! # Error Type Hierarchy
//!
//! `MancerError` is the taxonomy described in spec §7. Only `BuilderError`
//! is ever surfaced as a `Result::Err` crossing `Command::execute`'s
//! boundary; every other kind is materialized into a `CommandResult` with
//! `success = false` and the kind recorded in `metadata["error_kind"]` (see
//! `result.rs`), so composition (`CommandChain`) never has to catch panics
//! or exceptions to stay safe.

use crate::exit_codes::ExitCode;
use thiserror::Error;

/// Error kinds produced by the engine (spec §7).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MancerError {
    /// Could not start the local child process.
    #[error("failed to spawn local command: {0}")]
    BackendSpawnFailed(String),

    /// Could not open an SSH session (network, hostkey, auth negotiation).
    #[error("failed to connect to remote host: {0}")]
    SshConnectFailed(String),

    /// Authentication exhausted all configured methods.
    #[error("ssh authentication failed: {0}")]
    SshAuthFailed(String),

    /// sudo password rejected or not supplied when required.
    #[error("sudo authentication failed: {0}")]
    SudoAuthFailed(String),

    /// Execution was cooperatively cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// Execution exceeded its configured timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The selected parser raised on well-formed-looking input.
    #[error("parser failed: {0}")]
    ParserFailed(String),

    /// Format conversion could not proceed: collaborator unavailable.
    #[error("conversion unavailable: {0}")]
    ConversionUnavailable(String),

    /// Format conversion could not proceed without losing information.
    #[error("conversion would be lossy: {0}")]
    ConversionLossy(String),

    /// Invalid command shape (e.g. empty `name`, unquotable argument).
    #[error("invalid command: {0}")]
    BuilderError(String),

    /// The child command itself exited non-zero and the command's
    /// `success` override does not treat it as success.
    #[error("command failed with exit code {exit_code}")]
    CommandFailed {
        /// Exit code reported by the child process.
        exit_code: i32,
    },
}

impl MancerError {
    /// Map this error to the CLI exit code it should produce (spec §6).
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::BuilderError(_) => ExitCode::BuilderError,
            Self::BackendSpawnFailed(_) => ExitCode::BackendSpawnFailed,
            Self::Timeout(_) => ExitCode::Timeout,
            Self::SshConnectFailed(_) | Self::SshAuthFailed(_) => ExitCode::SshConnectFailed,
            Self::SudoAuthFailed(_) => ExitCode::SshConnectFailed,
            Self::Cancelled => ExitCode::Timeout,
            Self::ParserFailed(_) | Self::ConversionUnavailable(_) | Self::ConversionLossy(_) => {
                ExitCode::Success
            }
            Self::CommandFailed { .. } => ExitCode::ChildExitCode,
        }
    }

    /// Short machine-readable tag stored in `CommandResult::metadata["error_kind"]`.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::BackendSpawnFailed(_) => "BackendSpawnFailed",
            Self::SshConnectFailed(_) => "SshConnectFailed",
            Self::SshAuthFailed(_) => "SshAuthFailed",
            Self::SudoAuthFailed(_) => "SudoAuthFailed",
            Self::Cancelled => "Cancelled",
            Self::Timeout(_) => "Timeout",
            Self::ParserFailed(_) => "ParserFailed",
            Self::ConversionUnavailable(_) => "ConversionUnavailable",
            Self::ConversionLossy(_) => "ConversionLossy",
            Self::BuilderError(_) => "BuilderError",
            Self::CommandFailed { .. } => "CommandFailed",
        }
    }

    /// Whether this error kind must never be written to the result cache
    /// (spec §4.8).
    pub fn is_cache_poison(&self) -> bool {
        matches!(
            self,
            Self::BackendSpawnFailed(_) | Self::SshConnectFailed(_) | Self::SudoAuthFailed(_)
        )
    }
}

/// Result type alias used throughout the engine for the one error kind
/// that is allowed to propagate synchronously.
pub type MancerResult<T> = Result<T, MancerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            MancerError::BuilderError("bad".into()).exit_code(),
            ExitCode::BuilderError
        );
        assert_eq!(
            MancerError::SshConnectFailed("refused".into()).exit_code(),
            ExitCode::SshConnectFailed
        );
        assert_eq!(
            MancerError::CommandFailed { exit_code: 7 }.exit_code(),
            ExitCode::ChildExitCode
        );
    }

    #[test]
    fn test_cache_poison_kinds() {
        assert!(MancerError::BackendSpawnFailed("x".into()).is_cache_poison());
        assert!(MancerError::SudoAuthFailed("x".into()).is_cache_poison());
        assert!(!MancerError::ParserFailed("x".into()).is_cache_poison());
    }

    #[test]
    fn test_kind_tag() {
        assert_eq!(MancerError::Cancelled.kind_tag(), "Cancelled");
        assert_eq!(
            MancerError::CommandFailed { exit_code: 1 }.kind_tag(),
            "CommandFailed"
        );
    }
}
