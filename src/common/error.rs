//! Error types for the GDB/MI engine
//!
//! Every failure a caller can observe goes through [`Error`]. Variants that
//! reach the control channel carry a stable machine code (see
//! [`Error::code`]) so scripts can match on it instead of the message text.

use std::io;
use thiserror::Error;

use crate::mi::SyntaxError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    // === Protocol Errors ===
    #[error("MI syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("MI stream out of sync: {0}")]
    Correlation(String),

    // === Command Errors ===
    #[error("'{command}' rejected while the target is running: {message}")]
    BackendBusy { command: String, message: String },

    #[error("'{command}' failed: {message}")]
    BackendRejection { command: String, message: String },

    #[error("{operation} timed out after {millis} ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Run state changed while waiting: {0}")]
    StateChanged(String),

    // === Backend Process Errors ===
    #[error("GDB executable '{name}' not found. Searched: {searched}")]
    GdbNotFound { name: String, searched: String },

    #[error("GDB failed to start: {0}")]
    GdbStartFailed(String),

    #[error("GDB process exited")]
    ProcessExit,

    // === Session Errors ===
    #[error("Not connected to a target. Wait for the connection to complete first")]
    SessionNotConnected,

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: String, state: String },

    #[error("Unknown variable reference {0}")]
    UnknownReference(i64),

    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    // === Control Channel Errors ===
    #[error("Unknown control method '{0}'")]
    UnknownMethod(String),

    #[error("Invalid arguments for '{method}': {message}")]
    InvalidArguments { method: String, message: String },

    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a rejection error for a command GDB answered with `^error`
    pub fn rejection(command: &str, message: &str) -> Self {
        Self::BackendRejection {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error for a named operation
    pub fn timeout(operation: &str, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            millis,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a GDB not found error with search paths
    pub fn gdb_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::GdbNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// True when the command was refused only because the target was running
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::BackendBusy { .. })
    }

    /// Stable machine-readable code used on the control channel
    pub fn code(&self) -> &str {
        match self {
            Error::Syntax(_) => "SYNTAX_ERROR",
            Error::Correlation(_) => "CORRELATION",
            Error::BackendBusy { .. } => "BACKEND_BUSY",
            Error::BackendRejection { .. } => "BACKEND_REJECTION",
            Error::Timeout { .. } => "TIMEOUT",
            Error::StateChanged(_) => "STATE_CHANGED",
            Error::GdbNotFound { .. } => "GDB_NOT_FOUND",
            Error::GdbStartFailed(_) => "GDB_START_FAILED",
            Error::ProcessExit => "PROCESS_EXIT",
            Error::SessionNotConnected => "SESSION_NOT_CONNECTED",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::UnknownReference(_) => "UNKNOWN_REFERENCE",
            Error::InvalidLocation(_) => "INVALID_LOCATION",
            Error::UnknownMethod(_) => "UNKNOWN_METHOD",
            Error::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Error::Remote { code, .. } => code,
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Busy message GDB produces for commands that need a stopped target
pub fn is_busy_message(message: &str) -> bool {
    message.starts_with("Cannot execute this command while the selected thread is running")
        || message.starts_with("Cannot execute this command while the target is running")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_message_detection() {
        assert!(is_busy_message(
            "Cannot execute this command while the target is running.\nUse the \"interrupt\" command"
        ));
        assert!(is_busy_message(
            "Cannot execute this command while the selected thread is running."
        ));
        assert!(!is_busy_message("No symbol \"foo\" in current context."));
    }

    #[test]
    fn test_codes() {
        assert_eq!(Error::timeout("wait for stop", 6000).code(), "TIMEOUT");
        assert_eq!(Error::rejection("break-insert", "nope").code(), "BACKEND_REJECTION");
        assert_eq!(
            Error::Remote {
                code: "SESSION_NOT_CONNECTED".into(),
                message: "x".into()
            }
            .code(),
            "SESSION_NOT_CONNECTED"
        );
    }
}
