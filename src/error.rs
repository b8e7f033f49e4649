use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Exit code when the wrapped command cannot be found or executed.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 126;
/// Exit code when no pseudo-terminal could be allocated.
pub const EXIT_PTY_UNAVAILABLE: i32 = 127;
/// Exit code for any other proxy-internal failure.
pub const EXIT_INTERNAL: i32 = 1;

/// Errors raised by the title proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The wrapped command is not on the search path
    #[error("{0}: command not found")]
    CommandNotFound(String),

    /// The wrapped command exists but cannot be executed
    #[error("{0}: permission denied")]
    NotExecutable(String),

    /// The PTY was allocated but the child could not be started
    #[error("failed to start {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("could not allocate a pseudo-terminal: {0}")]
    PtyAllocation(String),

    /// A relay descriptor failed before the agent produced any output
    #[error("terminal relay failed: {0}")]
    Relay(#[source] io::Error),

    /// The controlling terminal could not be configured
    #[error("terminal setup failed: {0}")]
    Terminal(#[source] io::Error),

    /// The status engine hit something it could not handle; never fatal
    #[error("status classification fault: {0}")]
    ClassificationFault(String),

    #[error("invalid config file {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },
}

impl ProxyError {
    /// Process exit code reported to the invoking shell.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProxyError::CommandNotFound(_)
            | ProxyError::NotExecutable(_)
            | ProxyError::Spawn { .. } => EXIT_COMMAND_NOT_FOUND,
            ProxyError::PtyAllocation(_) => EXIT_PTY_UNAVAILABLE,
            ProxyError::Relay(_)
            | ProxyError::Terminal(_)
            | ProxyError::ClassificationFault(_)
            | ProxyError::Config { .. } => EXIT_INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_failures_use_fixed_codes() {
        assert_eq!(ProxyError::CommandNotFound("codex".into()).exit_code(), 126);
        assert_eq!(ProxyError::NotExecutable("./agent".into()).exit_code(), 126);
        assert_eq!(ProxyError::PtyAllocation("no ptys".into()).exit_code(), 127);
    }

    #[test]
    fn test_messages_name_the_command() {
        let err = ProxyError::CommandNotFound("claude".into());
        assert_eq!(err.to_string(), "claude: command not found");
    }
}
