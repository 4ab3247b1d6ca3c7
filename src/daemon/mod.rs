// Daemon module - hosts the supervisor behind the IPC socket

pub mod pid;

pub use pid::PidFile;

use crate::error::{Result, VigilError};
use crate::ipc::{Command, IpcServer, ResponseData};
use crate::process::Supervisor;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Supervisor, IPC server and PID file of one daemon process
pub struct Daemon {
    supervisor: Arc<Supervisor>,
    ipc_server: IpcServer,
    pid_file: PidFile,
}

impl Daemon {
    pub fn new<P1, P2>(supervisor: Supervisor, socket_path: P1, pid_path: P2) -> Self
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        Self {
            supervisor: Arc::new(supervisor),
            ipc_server: IpcServer::with_socket_path(socket_path),
            pid_file: PidFile::with_path(pid_path),
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Serve until `shutdown` resolves, then stop every app and clean up
    ///
    /// Children are terminated before the socket and PID file are removed.
    pub async fn run<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        if self.pid_file.is_daemon_running() {
            return Err(VigilError::DaemonAlreadyRunning);
        }
        self.pid_file.write()?;

        if let Err(e) = self.ipc_server.start() {
            let _ = self.pid_file.remove();
            return Err(e);
        }
        tracing::info!(
            "IPC server listening on {}",
            self.ipc_server.socket_path().display()
        );

        self.supervisor.start_all().await;

        let stop_serving = CancellationToken::new();
        let supervisor = Arc::clone(&self.supervisor);
        let serve = self.ipc_server.run(
            move |cmd| {
                let supervisor = Arc::clone(&supervisor);
                async move { handle_command(&supervisor, cmd).await }
            },
            stop_serving.clone(),
        );

        let served = tokio::select! {
            result = serve => result,
            _ = shutdown => {
                tracing::info!("Shutdown requested, stopping apps");
                stop_serving.cancel();
                Ok(())
            }
        };

        if let Err(ref e) = served {
            tracing::error!("IPC server error: {}", e);
        }

        self.supervisor.shutdown_all().await;

        self.ipc_server.stop()?;
        self.pid_file.remove()?;

        tracing::info!("Daemon stopped");
        served
    }
}

/// Execute one client command against the registry
pub async fn handle_command(supervisor: &Supervisor, command: Command) -> Result<ResponseData> {
    match command {
        Command::Start { name } => {
            supervisor.start(&name).await?;
            Ok(ResponseData::Started { name })
        }
        Command::Stop { name } => {
            supervisor.stop(&name).await?;
            Ok(ResponseData::Stopped { name })
        }
        Command::Restart { name } => {
            supervisor.restart(&name).await?;
            Ok(ResponseData::Restarted { name })
        }
        Command::Reset { name } => {
            supervisor.reset(&name).await?;
            Ok(ResponseData::Reset { name })
        }
        Command::Status { name } => Ok(ResponseData::Status(supervisor.status(&name).await?)),
        Command::List => Ok(ResponseData::AppList(supervisor.list().await)),
    }
}

/// Install SIGTERM and SIGINT handlers and return a future resolving on the first of them
///
/// Handlers are installed before this returns, so a failure surfaces here
/// instead of as an immediate shutdown.
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
    })
}
