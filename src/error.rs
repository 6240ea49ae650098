//! Error types for codegenius
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad URL, bad args, unknown job)
//! - 3: Interrupted (canceled or timed out)
//! - 4: Operation failed (git failure, persistence error)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the cg CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const INTERRUPTED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for codegenius operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid repository URL: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    // Interrupted (exit code 3)
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    // Operation failures (exit code 4)
    #[error("{0} not found in PATH")]
    ToolUnavailable(String),

    #[error("git clone failed: {code}")]
    ProcessFailure { code: i32, stderr_tail: Vec<String> },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::JobNotFound(_) => exit_codes::USER_ERROR,

            Error::Timeout(_) | Error::Canceled(_) => exit_codes::INTERRUPTED,

            Error::ToolUnavailable(_)
            | Error::ProcessFailure { .. }
            | Error::Git(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Whether an automated retry is reasonable for this failure.
    ///
    /// Timeouts and transient process failures are retryable; a cancel is an
    /// explicit decision and never is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ProcessFailure { .. } | Error::LockFailed(_)
        )
    }

    /// Structured details attached to the JSON error envelope.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::LockFailed(path) => Some(serde_json::json!({ "path": path })),
            Error::JobNotFound(id) => Some(serde_json::json!({ "task_id": id })),
            Error::ProcessFailure { code, stderr_tail } => Some(serde_json::json!({
                "exit_code": code,
                "stderr": stderr_tail,
            })),
            _ => None,
        }
    }

    /// Short machine-readable tag, published as `error_kind` in progress
    /// records so observers can tell failure modes apart.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::ToolUnavailable(_) => "tool_unavailable",
            Error::ProcessFailure { .. } => "process_failure",
            Error::Timeout(_) => "timeout",
            Error::Canceled(_) => "canceled",
            Error::InvalidConfig(_) | Error::InvalidArgument(_) | Error::JobNotFound(_) => {
                "user_error"
            }
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_) => "persistence",
            Error::Git(_) | Error::OperationFailed(_) => "internal",
        }
    }
}

/// Result type alias for codegenius operations
pub type Result<T> = std::result::Result<T, Error>;
