//! Error types for vlmsetup
//!
//! A single taxonomy shared by every subsystem. The menu engine turns these
//! into inline status lines; only bootstrap failures end the process.

use thiserror::Error;

/// Main error type for the environment manager
#[derive(Error, Debug)]
pub enum SetupError {
    /// Inference backend errors (bad status, malformed payloads)
    #[error("Backend error: {0}")]
    Backend(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// External command could not be run or exited unsuccessfully
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    /// The isolated environment could not be created or entered
    #[error("Environment bootstrap failed: {0}")]
    Bootstrap(String),

    /// Terminal or input source faults
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// The user cancelled a long-running operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic errors with context
    #[error("Setup error: {0}")]
    Generic(String),
}

/// Result type alias for manager operations
pub type Result<T> = std::result::Result<T, SetupError>;

impl SetupError {
    pub fn timeout(duration: std::time::Duration) -> Self {
        SetupError::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Convert anyhow errors to SetupError
impl From<anyhow::Error> for SetupError {
    fn from(err: anyhow::Error) -> Self {
        SetupError::Generic(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_command_error_display() {
        let err = SetupError::Command {
            command: "uv venv .venv".to_string(),
            reason: "exit code 2".to_string(),
        };
        assert!(err.to_string().contains("uv venv .venv"));
        assert!(err.to_string().contains("exit code 2"));
    }

    #[test]
    fn test_timeout_from_duration() {
        let err = SetupError::timeout(Duration::from_secs(3));
        assert!(err.to_string().contains("3000ms"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.jpg");
        let err: SetupError = io.into();
        assert!(matches!(err, SetupError::Io(_)));
        assert!(err.to_string().contains("missing.jpg"));
    }
}
