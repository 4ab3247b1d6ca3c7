// CLI module - User-facing command-line interface

mod output;

use crate::error::VigilError;
use crate::ipc::client::IpcClient;
use crate::ipc::protocol::{Command, ErrorReply, ResponseData};
use crate::ipc::DEFAULT_SOCKET_PATH;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil - supervise long-running apps with restart policies
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Socket of the running vigil-daemon
    #[arg(long, global = true, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a stopped app
    Start {
        /// App name
        name: String,
    },

    /// Stop an app (cancels a pending restart)
    Stop {
        /// App name
        name: String,
    },

    /// Restart an app and clear its restart count
    Restart {
        /// App name
        name: String,
    },

    /// Bring a permanently stopped app back to stopped
    Reset {
        /// App name
        name: String,
    },

    /// Show the status of one app
    Status {
        /// App name
        name: String,
    },

    /// List all apps
    List,
}

/// Outcome of one CLI invocation
enum Outcome {
    Success(ResponseData),
    Rejected(ErrorReply),
    Failed(VigilError),
}

impl Cli {
    /// Run the CLI application and return the process exit code
    ///
    /// 0 success, 1 app not found, 2 invalid in the current state, 3 OS or
    /// daemon error.
    pub fn run() -> i32 {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> i32 {
        let client = IpcClient::with_socket_path(&self.socket);
        let command = self.build_command();

        let outcome = match command {
            Command::Stop { .. } | Command::Restart { .. } => {
                let pb = output::create_progress_bar(&progress_message(&command));
                let outcome = send(&client, command);
                match outcome {
                    Outcome::Success(_) => output::finish_progress_success(pb, "Done"),
                    _ => output::finish_progress_error(pb, "Failed"),
                }
                outcome
            }
            _ => send(&client, command),
        };

        match outcome {
            Outcome::Success(data) => {
                output::print_success(&data);
                0
            }
            Outcome::Rejected(reply) => {
                output::print_error(&reply.message);
                reply.kind.exit_code()
            }
            Outcome::Failed(error) => {
                output::print_error(&error.to_string());
                error.kind().exit_code()
            }
        }
    }

    /// Build an IPC command from the CLI arguments
    fn build_command(&self) -> Command {
        match &self.command {
            Commands::Start { name } => Command::Start { name: name.clone() },
            Commands::Stop { name } => Command::Stop { name: name.clone() },
            Commands::Restart { name } => Command::Restart { name: name.clone() },
            Commands::Reset { name } => Command::Reset { name: name.clone() },
            Commands::Status { name } => Command::Status { name: name.clone() },
            Commands::List => Command::List,
        }
    }
}

fn send(client: &IpcClient, command: Command) -> Outcome {
    match client.send_command(command) {
        Ok(response) => match response.result {
            Ok(data) => Outcome::Success(data),
            Err(reply) => Outcome::Rejected(reply),
        },
        Err(e) => Outcome::Failed(e),
    }
}

fn progress_message(command: &Command) -> String {
    match command {
        Command::Stop { name } => format!("Stopping {}...", name),
        Command::Restart { name } => format!("Restarting {}...", name),
        _ => "Working...".to_string(),
    }
}
