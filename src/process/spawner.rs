use crate::error::{Result, VigilError};
use crate::logs::{spawn_pump, LogWriter};
use crate::process::restart::LAUNCH_FAILURE_EXIT_CODE;
use crate::process::types::AppSpec;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Handle to a launched child process
///
/// The child itself is owned by a waiter task; the handle observes its exit
/// code and addresses it by pid. Clones observe the same process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    started_at: SystemTime,
    exit: watch::Receiver<Option<i32>>,
}

impl ProcessHandle {
    /// Process ID assigned by the OS
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or(Duration::ZERO)
    }

    /// Exit code, if the process has already exited
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    /// Wait for the process to exit and return its exit code
    pub async fn wait(&mut self) -> i32 {
        let waited = self.exit.wait_for(Option::is_some).await.map(|code| *code);
        let code = match waited {
            Ok(code) => code,
            Err(_) => *self.exit.borrow(),
        };
        code.unwrap_or(LAUNCH_FAILURE_EXIT_CODE)
    }
}

/// Launch the app described by `spec`
///
/// Applies interpreter, script, arguments, working directory and environment,
/// and pipes stdout/stderr into the configured log files. The child runs in
/// its own process group so termination reaches everything it spawned.
pub async fn launch(spec: &AppSpec) -> Result<ProcessHandle> {
    if !spec.cwd.is_dir() {
        return Err(VigilError::LaunchError(format!(
            "Working directory does not exist: {}",
            spec.cwd.display()
        )));
    }

    if let Some(ref interpreter) = spec.interpreter {
        // Bare names are looked up on PATH by the OS
        if interpreter.components().count() > 1 && !interpreter.exists() {
            return Err(VigilError::LaunchError(format!(
                "Interpreter not found: {}",
                interpreter.display()
            )));
        }
    }

    let script = resolve_script(&spec.cwd, &spec.script);

    let mut command = match spec.interpreter {
        Some(ref interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(&script);
            command
        }
        None => Command::new(&script),
    };

    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let out_log = LogWriter::open(&spec.out_file, &spec.log_date_format)
        .await
        .map_err(|e| VigilError::LaunchError(e.to_string()))?;
    let err_log = LogWriter::open(&spec.error_file, &spec.log_date_format)
        .await
        .map_err(|e| VigilError::LaunchError(e.to_string()))?;

    let mut child = command.spawn().map_err(|e| {
        VigilError::LaunchError(format!("Failed to spawn '{}': {}", spec.name, e))
    })?;

    let pid = child.id().ok_or_else(|| {
        VigilError::LaunchError(format!("Failed to get PID for '{}'", spec.name))
    })?;

    if let Some(stdout) = child.stdout.take() {
        spawn_pump(stdout, out_log);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_pump(stderr, err_log);
    }

    let (exit_tx, exit_rx) = watch::channel(None);
    let name = spec.name.clone();
    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!("Failed to wait for '{}' (pid {}): {}", name, pid, e);
                LAUNCH_FAILURE_EXIT_CODE
            }
        };
        debug!("'{}' (pid {}) exited with code {}", name, pid, code);
        let _ = exit_tx.send(Some(code));
    });

    info!("Launched '{}' (pid {})", spec.name, pid);

    Ok(ProcessHandle {
        pid,
        started_at: SystemTime::now(),
        exit: exit_rx,
    })
}

/// Stop a process: `stop_signal` first, SIGKILL once `grace` runs out
///
/// Returns the exit code on a graceful exit. A forced kill still stops the
/// process but is reported as `TerminateError`.
pub async fn terminate(
    handle: &mut ProcessHandle,
    stop_signal: &str,
    grace: Duration,
) -> Result<i32> {
    if let Some(code) = handle.exit_code() {
        return Ok(code);
    }

    let stop_signal = parse_signal(stop_signal)?;
    let pid = handle.pid();

    debug!("Sending {} to pid {}", stop_signal, pid);
    signal_group(pid, stop_signal)?;

    match tokio::time::timeout(grace, handle.wait()).await {
        Ok(code) => Ok(code),
        Err(_) => {
            warn!(
                "pid {} did not exit within {:?}, sending SIGKILL",
                pid, grace
            );
            signal_group(pid, Signal::SIGKILL)?;
            let code = handle.wait().await;
            Err(VigilError::TerminateError(format!(
                "pid {} did not exit within {:?} and was killed (code {})",
                pid, grace, code
            )))
        }
    }
}

/// Map a signal name to a nix signal
pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(VigilError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

/// Signal the child's process group; a group that is already gone is not an error
fn signal_group(pid: u32, sig: Signal) -> Result<()> {
    match signal::killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(VigilError::SignalError(format!(
            "Failed to send {} to pid {}: {}",
            sig, pid, e
        ))),
    }
}

/// Normal exits report their code, signal deaths report 128 + signal
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(LAUNCH_FAILURE_EXIT_CODE)
}

/// A relative script is taken from cwd when it exists there, otherwise left to PATH lookup
fn resolve_script(cwd: &Path, script: &Path) -> PathBuf {
    if script.is_relative() {
        let candidate = cwd.join(script);
        if candidate.exists() {
            return candidate;
        }
    }
    script.to_path_buf()
}
