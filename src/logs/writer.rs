use crate::error::{Result, VigilError};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Appends timestamped lines of one child output stream to a log file
pub struct LogWriter {
    /// Path to the log file
    path: PathBuf,
    /// Async file handle opened in append mode
    file: TokioFile,
    /// strftime format of the line prefix
    date_format: String,
}

impl LogWriter {
    /// Open (or create) a log file in append mode, creating its directory if needed
    pub async fn open(path: &Path, date_format: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                VigilError::LogError(format!(
                    "Failed to create log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                VigilError::LogError(format!("Failed to open log {}: {}", path.display(), e))
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: TokioFile::from_std(file),
            date_format: date_format.to_string(),
        })
    }

    /// Write one output line with its timestamp prefix
    pub async fn write_line(&mut self, data: &[u8]) -> Result<()> {
        let entry = self.format_log_entry(&Local::now(), data);

        self.file
            .write_all(&entry)
            .await
            .map_err(|e| VigilError::LogError(format!("Failed to write to log: {}", e)))?;

        self.file
            .flush()
            .await
            .map_err(|e| VigilError::LogError(format!("Failed to flush log: {}", e)))?;

        Ok(())
    }

    /// Format: `[<timestamp>] <data>\n`
    fn format_log_entry(&self, timestamp: &DateTime<Local>, data: &[u8]) -> Vec<u8> {
        let timestamp_str = timestamp.format(&self.date_format).to_string();
        let data = data.strip_suffix(b"\n").unwrap_or(data);
        let data = data.strip_suffix(b"\r").unwrap_or(data);

        let mut entry = Vec::with_capacity(timestamp_str.len() + 4 + data.len());
        entry.push(b'[');
        entry.extend_from_slice(timestamp_str.as_bytes());
        entry.extend_from_slice(b"] ");
        entry.extend_from_slice(data);
        entry.push(b'\n');
        entry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Copy every line of `reader` into `writer` until the stream closes
pub fn spawn_pump<R>(reader: R, mut writer: LogWriter) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                // EOF - the child closed the stream
                Ok(0) => break,
                Ok(_) => {
                    if let Err(e) = writer.write_line(&line).await {
                        warn!("{}", e);
                    }
                }
                Err(e) => {
                    debug!("Stopped reading output for {}: {}", writer.path().display(), e);
                    break;
                }
            }
        }
    })
}
