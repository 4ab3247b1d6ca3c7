// IPC Client - Communicates with the daemon via Unix socket

use crate::error::{Result, VigilError};
use crate::ipc::{Command, Request, Response, DEFAULT_SOCKET_PATH};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum number of connection attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between connection attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    /// Create a new IPC client with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    /// Create a new IPC client with a custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command to the daemon and wait for a response
    ///
    /// Only the connection is retried; a request is never sent twice.
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(request_id, command);

        let stream = self.connect_with_retry()?;
        let response = Self::exchange(stream, &request)?;

        if response.id != request_id {
            return Err(VigilError::ProtocolError(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        Ok(response)
    }

    fn connect_with_retry(&self) -> Result<UnixStream> {
        let mut attempt = 1;
        loop {
            match self.connect() {
                Ok(stream) => return Ok(stream),
                // A missing socket will not appear by waiting
                Err(VigilError::DaemonNotRunning) => return Err(VigilError::DaemonNotRunning),
                Err(e) if attempt >= MAX_RETRY_ATTEMPTS => return Err(e),
                Err(_) => {
                    attempt += 1;
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
    }

    /// Write one request line and read one response line
    fn exchange(mut stream: UnixStream, request: &Request) -> Result<Response> {
        let request_json = serde_json::to_string(request).map_err(|e| {
            VigilError::SerializationError(format!("Failed to serialize request: {}", e))
        })?;

        writeln!(stream, "{}", request_json)
            .map_err(|e| VigilError::IpcError(format!("Failed to write request: {}", e)))?;

        stream
            .flush()
            .map_err(|e| VigilError::IpcError(format!("Failed to flush stream: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(|e| VigilError::IpcError(format!("Failed to read response: {}", e)))?;

        if response_line.is_empty() {
            return Err(VigilError::ProtocolError(
                "Daemon closed the connection without a response".to_string(),
            ));
        }

        serde_json::from_str(&response_line).map_err(|e| {
            VigilError::DeserializationError(format!("Failed to deserialize response: {}", e))
        })
    }

    /// Establish a connection to the daemon's Unix socket
    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(VigilError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VigilError::DaemonNotRunning
            } else {
                VigilError::ConnectionError(format!("Failed to connect to daemon: {}", e))
            }
        })
    }

    /// Get the socket path being used
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_with_custom_path() {
        let custom_path = "/tmp/custom-vigil.sock";
        let client = IpcClient::with_socket_path(custom_path);
        assert_eq!(client.socket_path(), Path::new(custom_path));
    }

    #[test]
    fn test_daemon_not_running_error() {
        let client = IpcClient::with_socket_path("/tmp/nonexistent-vigil.sock");
        match client.send_command(Command::List) {
            Err(VigilError::DaemonNotRunning) => {}
            other => panic!("Expected DaemonNotRunning error, got: {:?}", other),
        }
    }

    #[test]
    fn test_stale_socket_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("stale.sock");
        // A plain file where the socket should be
        std::fs::write(&socket_path, "").unwrap();

        let client = IpcClient::with_socket_path(&socket_path);
        assert!(matches!(
            client.send_command(Command::List),
            Err(VigilError::ConnectionError(_))
        ));
    }
}
