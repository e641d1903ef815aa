//! Error types for snapshot operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while snapshotting a repository.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured remote uses an HTTP(S) transport.
    ///
    /// Remote hosts fetch the snapshot non-interactively, so only
    /// SSH-style remotes are accepted.
    #[error("unsupported remote {url}: only SSH remotes (git@host:owner/repo.git) are supported")]
    UnsupportedRemote {
        /// The rejected remote URL
        url: String,
    },

    /// The directory is not inside a git work tree.
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),

    /// HEAD is not on a branch, so there is nothing to restore afterwards.
    #[error("HEAD is detached; check out a branch before deploying")]
    DetachedHead,

    /// A git command exited with a non-zero status.
    #[error("git {command} failed: {stderr}")]
    CommandFailed {
        /// The git subcommand and arguments
        command: String,
        /// Standard error output from git
        stderr: String,
    },

    /// IO error (usually git missing from PATH)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error happened before the repository was touched.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedRemote { .. } | Self::NotARepository(_) | Self::DetachedHead
        )
    }
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_remote_message() {
        let err = Error::UnsupportedRemote {
            url: "https://github.com/org/repo.git".to_string(),
        };
        assert!(err.to_string().contains("https://github.com/org/repo.git"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_command_failed_is_not_precondition() {
        let err = Error::CommandFailed {
            command: "push origin".to_string(),
            stderr: "rejected".to_string(),
        };
        assert!(!err.is_precondition());
    }
}
