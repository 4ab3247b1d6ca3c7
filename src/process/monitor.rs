use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples resident memory of supervised children
pub struct MemorySampler {
    /// System information collector
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Resident memory of `pid` in bytes
    ///
    /// Returns `None` when the process is no longer visible to the system.
    pub fn sample(&mut self, pid: u32) -> Option<u64> {
        let sys_pid = Pid::from_u32(pid);

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        self.system.process(sys_pid).map(|process| process.memory())
    }

    /// Check if a process is still alive in the system
    pub fn is_process_alive(&mut self, pid: u32) -> bool {
        self.sample(pid).is_some()
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
