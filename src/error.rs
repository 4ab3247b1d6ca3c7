use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the vigil supervisor
#[derive(Debug, Error)]
pub enum VigilError {
    // Application registry errors
    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("App already registered: {0}")]
    AppAlreadyExists(String),

    #[error("App {0} is in invalid state for this operation: {1}")]
    InvalidState(String, String),

    // Process errors
    #[error("Failed to launch process: {0}")]
    LaunchError(String),

    #[error("Failed to terminate process: {0}")]
    TerminateError(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Invalid cron expression: {0}")]
    ScheduleParseError(String),

    // Watcher errors
    #[error("File watcher error: {0}")]
    WatcherError(String),

    // Log errors
    #[error("Log error: {0}")]
    LogError(String),

    // IPC errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon already running")]
    DaemonAlreadyRunning,

    #[error("PID file error: {0}")]
    PidFileError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an error, carried over IPC and mapped to CLI exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Os,
    Other,
}

impl ErrorKind {
    /// Exit code reported by the CLI front-end
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::NotFound => 1,
            ErrorKind::InvalidState => 2,
            ErrorKind::Os | ErrorKind::Other => 3,
        }
    }
}

impl VigilError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VigilError::AppNotFound(_) => ErrorKind::NotFound,
            VigilError::InvalidState(_, _) | VigilError::AppAlreadyExists(_) => {
                ErrorKind::InvalidState
            }
            VigilError::LaunchError(_)
            | VigilError::TerminateError(_)
            | VigilError::SignalError(_)
            | VigilError::WatcherError(_)
            | VigilError::LogError(_)
            | VigilError::IpcError(_)
            | VigilError::ConnectionError(_)
            | VigilError::DaemonNotRunning
            | VigilError::PidFileError(_)
            | VigilError::Io(_) => ErrorKind::Os,
            _ => ErrorKind::Other,
        }
    }
}

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
