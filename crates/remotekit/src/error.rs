//! Error types for remote execution.
//!
//! Errors are categorized so that connection establishment can be retried
//! while everything else surfaces immediately. Each category carries a
//! description and advice for the top-level error report.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of remote execution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Remote host unreachable (transient, retryable)
    Connection,
    /// A command ran but exited with a non-zero status
    Command,
    /// Operation not available for this executor
    NotSupported,
    /// Cloud instance could not be created
    Provisioning,
    /// Bad target descriptor or executor state
    Usage,
    /// Script bundle or credential problem on the local side
    Setup,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "Remote host unreachable",
            Self::Command => "Remote command failed",
            Self::NotSupported => "Operation not supported by this target",
            Self::Provisioning => "Cloud provisioning failed",
            Self::Usage => "Invalid target",
            Self::Setup => "Local setup problem",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Connection => {
                "Make sure `ssh <host>` works without extra parameters; put options in ~/.ssh/config"
            }
            Self::Command => "Check the command output above",
            Self::NotSupported => "Use a SLURM or cloud target for sweeps and scheduler headers",
            Self::Provisioning => "Check the machine type and your cloud credentials",
            Self::Usage => "Targets look like host, ssh://host, aws://t3.large or docker://context",
            Self::Setup => "Run `buddy doctor` to check the local setup",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while driving a remote target.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not establish a connection (after retries)
    #[error("cannot connect to {host}: {message}")]
    Connection {
        /// Host that could not be reached
        host: String,
        /// Transport error message
        message: String,
    },

    /// Command exited with a non-zero status
    #[error("command failed with exit code {}: {command}{}", exit_code_label(.exit_code), stderr_suffix(.stderr))]
    CommandFailed {
        /// The command that was run
        command: String,
        /// Exit code, if the process exited normally
        exit_code: Option<i32>,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// Operation not supported by the executor
    #[error("{operation} is not supported by the {executor} executor")]
    NotSupported {
        /// Executor name
        executor: String,
        /// Operation that was requested
        operation: String,
    },

    /// Cloud provisioning failed
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] cloudkit::Error),

    /// Scheduler template has no directive line to anchor the extra header
    #[error("malformed template {file}: no #SBATCH line to insert the extra header after")]
    MalformedTemplate {
        /// Template file name
        file: String,
    },

    /// Target scheme not in the executor table
    #[error("unsupported target scheme: {0}")]
    UnsupportedScheme(String),

    /// Target descriptor could not be parsed
    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    /// Launch attempted before `setup_remote`
    #[error("remote scripts are not set up; call setup_remote first")]
    ScriptsNotReady,

    /// Remote temporary directory could not be created
    #[error("could not create a remote scripts folder on {host}: {message}")]
    RemoteDir {
        /// Remote host
        host: String,
        /// Details
        message: String,
    },

    /// Local credential file missing
    #[error("credential file not found: {0}")]
    CredentialNotFound(PathBuf),

    /// Script bundle could not be loaded
    #[error("script bundle error: {0}")]
    Bundle(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "?".to_string(), |c| c.to_string())
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n{stderr}")
    }
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Connection { .. } => ErrorCategory::Connection,
            Error::CommandFailed { .. } | Error::RemoteDir { .. } => ErrorCategory::Command,
            Error::NotSupported { .. } => ErrorCategory::NotSupported,
            Error::Provisioning(_) => ErrorCategory::Provisioning,
            Error::UnsupportedScheme(_) | Error::InvalidTarget(_) | Error::ScriptsNotReady => {
                ErrorCategory::Usage
            }
            Error::MalformedTemplate { .. }
            | Error::CredentialNotFound(_)
            | Error::Bundle(_) => ErrorCategory::Setup,
            Error::Io(_) | Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Shorthand for [`Error::NotSupported`].
    pub fn not_supported(executor: impl ToString, operation: impl Into<String>) -> Self {
        Error::NotSupported {
            executor: executor.to_string(),
            operation: operation.into(),
        }
    }
}

/// Result type for remote execution.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_is_retryable() {
        assert!(ErrorCategory::Connection.is_retryable());
        assert!(!ErrorCategory::Command.is_retryable());
        assert!(!ErrorCategory::Provisioning.is_retryable());
        assert!(!ErrorCategory::NotSupported.is_retryable());
    }

    #[test]
    fn test_command_failed_message_includes_stderr() {
        let err = Error::CommandFailed {
            command: "scontrol ping".to_string(),
            exit_code: Some(127),
            stdout: String::new(),
            stderr: "scontrol: command not found\n".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 127"));
        assert!(msg.ends_with("scontrol: command not found"));
        assert_eq!(err.category(), ErrorCategory::Command);
    }

    #[test]
    fn test_command_failed_without_exit_code() {
        let err = Error::CommandFailed {
            command: "sleep 10".to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "command failed with exit code ?: sleep 10");
    }

    #[test]
    fn test_provisioning_wraps_cloud_error() {
        let err: Error = cloudkit::Error::MachineTypeNotFound("t9.mega".into()).into();
        assert_eq!(err.category(), ErrorCategory::Provisioning);
        assert!(err.to_string().contains("t9.mega"));
    }

    #[test]
    fn test_not_supported_helper() {
        let err = Error::not_supported("ssh", "sweep_agent");
        assert_eq!(
            err.to_string(),
            "sweep_agent is not supported by the ssh executor"
        );
        assert!(!err.is_retryable());
    }
}
