use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vigil::config::SupervisorSettings;
use vigil::daemon::{pid::DEFAULT_PID_FILE, shutdown_signal, Daemon};
use vigil::ipc::DEFAULT_SOCKET_PATH;
use vigil::process::Supervisor;

/// Vigil daemon - runs and supervises the apps of an ecosystem file
#[derive(Parser)]
#[command(name = "vigil-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Ecosystem file (.toml or .json)
    config: PathBuf,

    /// Unix socket the CLI connects to
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// PID file of this daemon
    #[arg(long, default_value = DEFAULT_PID_FILE)]
    pid_file: PathBuf,

    /// Interval between memory samples of running apps, in milliseconds
    #[arg(long, default_value_t = 2000)]
    memory_check_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let settings = SupervisorSettings {
        memory_check_interval: Duration::from_millis(args.memory_check_interval.max(1)),
        ..SupervisorSettings::default()
    };

    let supervisor = Supervisor::load(&args.config, settings)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    tracing::info!(
        "Loaded {} app(s) from {}",
        supervisor.names().len(),
        args.config.display()
    );

    let shutdown = shutdown_signal().context("Failed to install signal handlers")?;

    let daemon = Daemon::new(supervisor, &args.socket, &args.pid_file);
    daemon.run(shutdown).await.context("Daemon failed")?;

    Ok(())
}
