// Process module - launching, restart policy and per-app supervision

pub mod controller;
mod manager;
pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod types;

pub use controller::{spawn_controller, ControllerHandle};
pub use manager::{AppEntry, Supervisor};
pub use monitor::MemorySampler;
pub use restart::{RestartCause, RestartDecision, RestartPolicy, LAUNCH_FAILURE_EXIT_CODE};
pub use spawner::{launch, terminate, ProcessHandle};
pub use types::{AppSpec, AppStatus, LifecycleState, StateChange, WatchOptions};
