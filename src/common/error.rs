//! Error types for the debugger client
//!
//! Commands that only nudge the debuggee (step, resume, breakpoint edits) never
//! surface these; operations that hand a value back to the caller do.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debugger client
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    #[error("Disconnected: the debugged process is not running")]
    Disconnected,

    #[error("Process is running: no stack frame is selected")]
    NoCurrentFrame,

    #[error("Unable to establish connection with debugger: {0}")]
    ConnectionFailed(String),

    #[error("Timed out after {0} seconds waiting for the debugger to connect")]
    ConnectTimeout(u64),

    #[error("Debug session is closed")]
    SessionClosed,

    // === Debuggee Errors ===
    #[error("Failed to start debuggee: {0}")]
    DebuggeeStartFailed(String),

    #[error("Python interpreter '{name}' not found. Set [debugger].python in {config}")]
    InterpreterNotFound { name: String, config: String },

    // === Protocol Errors ===
    #[error("pydevd protocol error: {0}")]
    Protocol(String),

    #[error("pydevd command '{command}' failed: {message}")]
    RemoteError { command: String, message: String },

    #[error("Invalid XML from debugger: {0}")]
    Xml(#[from] roxmltree::Error),

    // === Breakpoint Errors ===
    #[error("Invalid source location: {0}")]
    InvalidLocation(String),

    // === Execution Errors ===
    #[error("Thread {0} not found")]
    ThreadNotFound(String),

    #[error("Frame {frame} not found in thread {thread}")]
    FrameNotFound { thread: String, frame: String },

    // === Timeout Errors ===
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a remote command failure
    pub fn remote(command: &str, message: &str) -> Self {
        Self::RemoteError {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an interpreter-not-found error pointing at the config file
    pub fn interpreter_not_found(name: &str) -> Self {
        Self::InterpreterNotFound {
            name: name.to_string(),
            config: super::paths::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config.toml".to_string()),
        }
    }

    /// Whether the error means the debuggee is gone rather than a bad request
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Disconnected | Error::SessionClosed | Error::ConnectionFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_messages() {
        assert!(Error::Disconnected.to_string().contains("not running"));
        assert!(Error::NoCurrentFrame.to_string().contains("Process is running"));
        assert_eq!(
            Error::remote("evaluate", "NameError").to_string(),
            "pydevd command 'evaluate' failed: NameError"
        );
    }

    #[test]
    fn test_is_disconnect() {
        assert!(Error::Disconnected.is_disconnect());
        assert!(!Error::NoCurrentFrame.is_disconnect());
        assert!(!Error::Timeout(3).is_disconnect());
    }
}
