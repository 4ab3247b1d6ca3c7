use crate::schedule::CronSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Exit code reported when a launch fails before a child exists
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -1;

/// Why a restart (or a restart decision) is happening
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartCause {
    /// The child exited without being asked to
    Crash { exit_code: i32 },
    /// The child could not be launched
    LaunchFailure,
    /// The child's memory reached `max_memory_restart`
    MemoryLimit { bytes: u64 },
    /// The cron schedule matched
    Schedule,
    /// The working tree changed
    FileChange,
    /// An operator asked for it
    Manual,
}

impl RestartCause {
    /// Schedule, file-change and manual restarts never consume the restart budget
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            RestartCause::Schedule | RestartCause::FileChange | RestartCause::Manual
        )
    }

    /// Exit code to record for this cause, if it represents an exit
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RestartCause::Crash { exit_code } => Some(*exit_code),
            RestartCause::LaunchFailure => Some(LAUNCH_FAILURE_EXIT_CODE),
            _ => None,
        }
    }
}

impl fmt::Display for RestartCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartCause::Crash { exit_code } => write!(f, "exited with code {}", exit_code),
            RestartCause::LaunchFailure => write!(f, "launch failure"),
            RestartCause::MemoryLimit { bytes } => write!(f, "memory limit ({} bytes)", bytes),
            RestartCause::Schedule => write!(f, "cron schedule"),
            RestartCause::FileChange => write!(f, "file change"),
            RestartCause::Manual => write!(f, "manual restart"),
        }
    }
}

/// Outcome of consulting the restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    RestartNow,
    RestartAfterDelay(Duration),
    DoNotRestart,
    PermanentlyStopped,
}

impl RestartDecision {
    /// Whether acting on this decision consumes one unit of the restart budget
    pub fn counts_against_budget(&self, cause: &RestartCause) -> bool {
        !cause.is_forced()
            && matches!(
                self,
                RestartDecision::RestartNow | RestartDecision::RestartAfterDelay(_)
            )
    }
}

/// Restart policy configuration
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether the app is relaunched after it exits on its own
    pub autorestart: bool,
    /// Cap on policy-driven restarts before the app is stopped for good
    pub max_restarts: u32,
    /// Delay applied before relaunching after an exit
    pub restart_delay: Duration,
    /// Memory threshold in bytes that forces a restart
    pub max_memory_restart: Option<u64>,
    /// Schedule for periodic forced restarts
    pub cron_restart: Option<CronSchedule>,
    /// Exit codes treated as a deliberate stop
    pub stop_exit_codes: Vec<i32>,
}

impl RestartPolicy {
    pub fn new(autorestart: bool, max_restarts: u32, restart_delay: Duration) -> Self {
        Self {
            autorestart,
            max_restarts,
            restart_delay,
            max_memory_restart: None,
            cron_restart: None,
            stop_exit_codes: Vec::new(),
        }
    }

    /// Decide what to do about `cause` given how many restarts have already happened
    pub fn decide(&self, cause: &RestartCause, restart_count: u32) -> RestartDecision {
        if cause.is_forced() {
            return RestartDecision::RestartNow;
        }

        if let RestartCause::Crash { exit_code } = cause {
            if self.stop_exit_codes.contains(exit_code) {
                return RestartDecision::DoNotRestart;
            }
        }

        let memory = matches!(cause, RestartCause::MemoryLimit { .. });
        if !self.autorestart && !memory {
            return RestartDecision::DoNotRestart;
        }

        if restart_count >= self.max_restarts {
            return RestartDecision::PermanentlyStopped;
        }

        if memory {
            RestartDecision::RestartNow
        } else {
            RestartDecision::RestartAfterDelay(self.restart_delay)
        }
    }

    /// Whether a memory sample breaches `max_memory_restart`
    pub fn exceeds_memory(&self, bytes: u64) -> bool {
        self.max_memory_restart
            .map(|limit| bytes >= limit)
            .unwrap_or(false)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(true, 16, Duration::ZERO)
    }
}
