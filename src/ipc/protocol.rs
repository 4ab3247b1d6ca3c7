// IPC Protocol definitions for client-daemon communication

use crate::error::{ErrorKind, VigilError};
use crate::process::AppStatus;
use serde::{Deserialize, Serialize};

/// All available commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    /// Leave the permanently stopped state
    Reset { name: String },
    Status { name: String },
    List,
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    Started { name: String },
    Stopped { name: String },
    Restarted { name: String },
    Reset { name: String },
    Status(AppStatus),
    /// Status of every registered app
    AppList(Vec<AppStatus>),
}

/// Error carried back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&VigilError> for ErrorReply {
    fn from(error: &VigilError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, ErrorReply>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: &VigilError) -> Self {
        Self {
            id,
            result: Err(ErrorReply::from(error)),
        }
    }
}
