//! Error types for provisioning operations.
//!
//! Provisioning failures are fatal: an instance that could not be created or
//! never became reachable is reported, not retried. Categories exist to give
//! the user a description and a hint on what to fix.

use std::fmt;
use std::io;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of provisioning errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network or HTTP failure talking to the provider.
    Network,
    /// Credentials are missing or were rejected.
    Credentials,
    /// Requested machine type or a matching image does not exist.
    NotFound,
    /// Provider tooling (e.g. the `aws` CLI) is missing or failed.
    Tooling,
    /// The instance did not become ready in time.
    Timeout,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Cloud provider unreachable",
            Self::Credentials => "Cloud credentials missing or rejected",
            Self::NotFound => "Machine type or image not found",
            Self::Tooling => "Cloud provider tooling failed",
            Self::Timeout => "Instance did not become ready",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection and the provider status page",
            Self::Credentials => "Export HCLOUD_TOKEN or configure the AWS CLI (aws configure)",
            Self::NotFound => "Check the machine type name in the target (e.g. aws://t3.large)",
            Self::Tooling => "Install the provider CLI and make sure it is in PATH",
            Self::Timeout => "Check the provider console; the instance may need to be removed",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while provisioning an instance.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required credential environment variable is not set.
    #[error("{variable} is not set")]
    MissingToken {
        /// Name of the environment variable.
        variable: &'static str,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    HttpError {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// The provider API reported a failure.
    #[error("{provider} API error: {message}")]
    Api {
        /// Provider name.
        provider: &'static str,
        /// Error message.
        message: String,
    },

    /// No machine type with the requested name.
    #[error("unknown machine type: {0}")]
    MachineTypeNotFound(String),

    /// No image available for the requested machine type.
    #[error("no image found for machine type {0}")]
    ImageNotFound(String),

    /// Provider CLI not found in PATH.
    #[error("{0} CLI not found in PATH")]
    CliNotFound(&'static str),

    /// Provider CLI exited with a non-zero status.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Standard error output.
        stderr: String,
    },

    /// Instance never reached the ready state.
    #[error("timed out waiting for {what}")]
    Timeout {
        /// What was being waited on.
        what: String,
    },

    /// Unexpected response shape.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::HttpError {
            message: message.into(),
            status,
        }
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingToken { .. } => ErrorCategory::Credentials,
            Error::HttpError {
                status: Some(401 | 403),
                ..
            } => ErrorCategory::Credentials,
            Error::HttpError { .. } => ErrorCategory::Network,
            Error::Api { .. } => ErrorCategory::Other,
            Error::MachineTypeNotFound(_) | Error::ImageNotFound(_) => ErrorCategory::NotFound,
            Error::CliNotFound(_) | Error::CommandFailed { .. } => ErrorCategory::Tooling,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::InvalidResponse(_) | Error::Json(_) => ErrorCategory::Other,
            Error::Io(_) => ErrorCategory::Other,
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::HttpError {
                message: format!("HTTP {code}"),
                status: Some(code),
            },
            other => Self::HttpError {
                message: other.to_string(),
                status: None,
            },
        }
    }
}
