//! Error types for the runner module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running an external estimation/render step.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Executable not found.
    #[error("Executable not found at path: {path}")]
    ExecutableNotFound { path: PathBuf },

    /// The external process exited with a non-zero status.
    #[error("Process failed with exit code {code:?}")]
    ProcessFailed {
        code: Option<i32>,
        stderr: Option<String>,
    },

    /// The process succeeded but its output could not be used.
    #[error("Invalid runner output: {reason}")]
    InvalidOutput { reason: String },

    /// The request cannot be executed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The process exceeded the configured timeout.
    #[error("Runner timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// I/O error while preparing inputs or reading outputs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The cancellation token was signalled.
    #[error("Runner cancelled")]
    Cancelled,
}

impl RunnerError {
    /// Creates a new process failed error with stderr output.
    pub fn process_failed(code: Option<i32>, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        Self::ProcessFailed {
            code,
            stderr: if stderr.is_empty() { None } else { Some(stderr) },
        }
    }

    /// Creates a new invalid output error.
    pub fn invalid_output(reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            reason: reason.into(),
        }
    }

    /// Cancellation is not a failure; callers treat it silently.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
