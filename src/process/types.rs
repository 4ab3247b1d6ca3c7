use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable description of how to launch one managed app
#[derive(Debug, Clone, PartialEq)]
pub struct AppSpec {
    /// App name (unique identifier in the registry)
    pub name: String,
    /// Program used to run the script, if any
    pub interpreter: Option<PathBuf>,
    /// Script or executable to run
    pub script: PathBuf,
    pub args: Vec<String>,
    /// Working directory, also the root of the file watch
    pub cwd: PathBuf,
    /// Variables added on top of the supervisor's own environment
    pub env: HashMap<String, String>,
    /// Log file receiving the child's stdout
    pub out_file: PathBuf,
    /// Log file receiving the child's stderr
    pub error_file: PathBuf,
    /// strftime format used to prefix every log line
    pub log_date_format: String,
    /// Signal sent for a graceful stop
    pub stop_signal: String,
    /// Grace period before the child is killed
    pub kill_timeout: Duration,
    /// File watch settings, when restart-on-change is enabled
    pub watch: Option<WatchOptions>,
}

/// Restart-on-change settings
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    /// Absolute paths whose events never trigger a restart
    pub ignore: Vec<PathBuf>,
    /// Quiet period required before a restart is requested
    pub debounce: Duration,
}

/// Lifecycle state of a managed app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    RestartPending,
    PermanentlyStopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::RestartPending => write!(f, "restart-pending"),
            LifecycleState::PermanentlyStopped => write!(f, "stopped-permanently"),
        }
    }
}

/// A single lifecycle transition, broadcast to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Snapshot of an app reported by `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    pub name: String,
    pub state: LifecycleState,
    pub restart_count: u32,
    pub pid: Option<u32>,
    pub uptime: Option<Duration>,
    pub last_exit_code: Option<i32>,
    pub memory_bytes: Option<u64>,
    /// Most recent launch, terminate or configuration error
    pub last_error: Option<String>,
}

impl AppStatus {
    /// Status reported for an app whose configuration was rejected
    pub fn rejected(name: &str, error: &str) -> Self {
        Self {
            name: name.to_string(),
            state: LifecycleState::PermanentlyStopped,
            restart_count: 0,
            pid: None,
            uptime: None,
            last_exit_code: None,
            memory_bytes: None,
            last_error: Some(error.to_string()),
        }
    }
}
