// PID file management for the daemon process

use crate::error::{Result, VigilError};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};

/// Default PID file location
pub const DEFAULT_PID_FILE: &str = "/tmp/vigil.pid";

/// Manages the daemon PID file
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create a new PID file manager with default path
    pub fn new() -> Self {
        Self::with_path(DEFAULT_PID_FILE)
    }

    /// Create a new PID file manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file
    pub fn write(&self) -> Result<()> {
        let pid = std::process::id();
        fs::write(&self.path, pid.to_string())
            .map_err(|e| VigilError::PidFileError(format!("Failed to write PID file: {}", e)))
    }

    /// Read the PID from the file
    ///
    /// Only positive values that fit a `pid_t` are accepted; 0 and negative
    /// values would address process groups when signalled.
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| VigilError::PidFileError(format!("Failed to read PID file: {}", e)))?;

        let pid = content
            .trim()
            .parse::<i32>()
            .map_err(|e| VigilError::PidFileError(format!("Invalid PID in file: {}", e)))?;

        if pid <= 0 {
            return Err(VigilError::PidFileError(format!(
                "Invalid PID in file: {}",
                pid
            )));
        }
        Ok(pid as u32)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the PID file
    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                VigilError::PidFileError(format!("Failed to remove PID file: {}", e))
            })?;
        }
        Ok(())
    }

    /// Check if the daemon is running by checking if the PID exists and is alive
    pub fn is_daemon_running(&self) -> bool {
        match self.read() {
            Ok(pid) => is_process_alive(pid),
            Err(_) => false,
        }
    }

    /// Get the path to the PID file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for PidFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Check liveness with signal 0
fn is_process_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(temp_dir.path().join("vigil.pid"));

        pid_file.write().unwrap();

        assert_eq!(pid_file.read().unwrap(), std::process::id());
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(temp_dir.path().join("vigil.pid"));

        pid_file.write().unwrap();
        assert!(pid_file.exists());

        pid_file.remove().unwrap();
        assert!(!pid_file.exists());

        // Removing twice is fine
        pid_file.remove().unwrap();
    }

    #[test]
    fn test_is_daemon_running_current_process() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(temp_dir.path().join("vigil.pid"));

        assert!(!pid_file.is_daemon_running());

        pid_file.write().unwrap();
        assert!(pid_file.is_daemon_running());
    }

    #[test]
    fn test_garbage_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vigil.pid");
        fs::write(&path, "not-a-pid").unwrap();

        let pid_file = PidFile::with_path(&path);
        assert!(matches!(pid_file.read(), Err(VigilError::PidFileError(_))));
        assert!(!pid_file.is_daemon_running());
    }

    #[test]
    fn test_out_of_range_pids_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vigil.pid");
        let pid_file = PidFile::with_path(&path);

        for content in ["0", "-1", "2147483648", "4294967295"] {
            fs::write(&path, content).unwrap();
            assert!(
                matches!(pid_file.read(), Err(VigilError::PidFileError(_))),
                "{} accepted",
                content
            );
            assert!(!pid_file.is_daemon_running(), "{} accepted", content);
        }
    }
}
