// Watch module - restart on change of the working tree

use crate::error::{Result, VigilError};
use crate::process::controller::ControllerMessage;
use crate::process::restart::RestartCause;
use crate::process::types::{AppSpec, WatchOptions};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Paths whose changes never trigger a restart
///
/// Covers the directories of both log files, the log files themselves and
/// every `ignore_watch` entry. A log directory that is the watched root (or
/// one of its ancestors) is never excluded; only its log files are.
pub fn excluded_paths(spec: &AppSpec, options: &WatchOptions) -> Vec<PathBuf> {
    let root = normalize(&spec.cwd);
    let mut excluded = Vec::new();

    for log in [&spec.out_file, &spec.error_file] {
        if let Some(dir) = log.parent().map(normalize) {
            if !root.starts_with(&dir) {
                excluded.push(dir);
            }
        }
        excluded.push(normalize(log));
    }

    excluded.extend(options.ignore.iter().map(|p| normalize(p)));
    excluded.sort();
    excluded.dedup();
    excluded
}

pub fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|prefix| path.starts_with(prefix))
}

/// Start watching `spec.cwd` recursively
///
/// Relevant changes are debounced and turned into one
/// `ForcedRestart(FileChange)` per quiet period. The OS watch is released
/// when `cancel` fires.
pub(crate) fn spawn_watcher(
    spec: &AppSpec,
    options: &WatchOptions,
    events: mpsc::Sender<ControllerMessage>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let root = spec.cwd.canonicalize().map_err(|e| {
        VigilError::WatcherError(format!("Cannot watch {}: {}", spec.cwd.display(), e))
    })?;
    let excluded = excluded_paths(spec, options);

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let app = spec.name.clone();
    let callback_app = app.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_relevant(&event.kind) {
                let _ = raw_tx.send(event.paths);
            }
        }
        Err(e) => warn!("File watcher error for '{}': {}", callback_app, e),
    })
    .map_err(|e| VigilError::WatcherError(format!("Failed to create watcher: {}", e)))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| {
            VigilError::WatcherError(format!("Failed to watch {}: {}", root.display(), e))
        })?;

    info!("Watching {} for changes to '{}'", root.display(), app);

    let debounce = options.debounce;

    Ok(tokio::spawn(async move {
        // Keep the OS watch alive for as long as the loop runs
        let _watcher = watcher;
        debounce_changes(app, raw_rx, excluded, debounce, events, cancel).await;
    }))
}

/// Turn bursts of changed paths into single restart requests
async fn debounce_changes(
    app: String,
    mut changes: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    excluded: Vec<PathBuf>,
    debounce: Duration,
    events: mpsc::Sender<ControllerMessage>,
    cancel: CancellationToken,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let pending_deadline = deadline;
        let quiet = async move {
            match pending_deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,

            maybe_paths = changes.recv() => {
                let Some(paths) = maybe_paths else { break };
                if let Some(path) = paths.iter().find(|p| !is_excluded(p, &excluded)) {
                    debug!("'{}': change detected at {}", app, path.display());
                    deadline = Some(Instant::now() + debounce);
                }
            }

            _ = quiet => {
                deadline = None;
                info!("Files changed for '{}', requesting restart", app);
                let msg = ControllerMessage::ForcedRestart(RestartCause::FileChange);
                if events.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("File watcher for '{}' stopped", app);
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Canonical form of `path`, resolving through its parent when it does not exist yet
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => normalize(parent).join(name),
        _ => path.to_path_buf(),
    }
}
