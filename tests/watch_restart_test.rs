// Restart-on-change against a real working tree

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;
use vigil::config::SupervisorSettings;
use vigil::process::{LifecycleState, StateChange, Supervisor};

fn load(dir: &Path, contents: &str) -> Supervisor {
    let config_path = dir.join("ecosystem.toml");
    std::fs::write(&config_path, contents).unwrap();
    Supervisor::load(&config_path, SupervisorSettings::default()).unwrap()
}

async fn next_state(rx: &mut broadcast::Receiver<StateChange>) -> LifecycleState {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a state change")
        .expect("state channel closed")
        .to
}

// The child writes to its log every 50ms, inside the watched tree
const TICKER: &str = r#"
name = "ticker"
script = "/bin/sh"
args = ["-c", "while true; do echo tick; sleep 0.05; done"]
watch = true
watch_delay = 200
ignore_watch = ["cache"]
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_log_writes_do_not_restart() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(temp_dir.path(), TICKER);
    let mut changes = supervisor.subscribe("ticker").unwrap();

    supervisor.start("ticker").await.unwrap();
    while next_state(&mut changes).await != LifecycleState::Running {}
    let pid = supervisor.status("ticker").await.unwrap().pid;

    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(supervisor.status("ticker").await.unwrap().pid, pid);
    assert!(temp_dir.path().join("logs/ticker-out.log").exists());

    supervisor.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_of_changes_restarts_once() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(temp_dir.path(), TICKER);
    let mut changes = supervisor.subscribe("ticker").unwrap();

    supervisor.start("ticker").await.unwrap();
    while next_state(&mut changes).await != LifecycleState::Running {}
    let first = supervisor.status("ticker").await.unwrap().pid;

    // Let the watcher settle before touching the tree
    tokio::time::sleep(Duration::from_millis(200)).await;
    for i in 0..5 {
        std::fs::write(temp_dir.path().join("app.py"), format!("print({})", i)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(next_state(&mut changes).await, LifecycleState::Stopping);
    assert_eq!(next_state(&mut changes).await, LifecycleState::Starting);
    assert_eq!(next_state(&mut changes).await, LifecycleState::Running);

    // No second cycle once the tree is quiet
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));

    let status = supervisor.status("ticker").await.unwrap();
    assert_ne!(status.pid, first);
    // File-change restarts never consume the restart budget
    assert_eq!(status.restart_count, 0);

    supervisor.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignored_paths_do_not_restart() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join("cache")).unwrap();
    let supervisor = load(temp_dir.path(), TICKER);
    let mut changes = supervisor.subscribe("ticker").unwrap();

    supervisor.start("ticker").await.unwrap();
    while next_state(&mut changes).await != LifecycleState::Running {}

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(temp_dir.path().join("cache/entry"), "data").unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));

    supervisor.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_logs_in_cwd_still_restart_on_change() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "flat"
        script = "/bin/sh"
        args = ["-c", "while true; do echo tick; sleep 0.05; done"]
        output = "flat-out.log"
        error = "flat-error.log"
        watch = true
        watch_delay = 200
        "#,
    );
    let mut changes = supervisor.subscribe("flat").unwrap();

    supervisor.start("flat").await.unwrap();
    while next_state(&mut changes).await != LifecycleState::Running {}

    // Log writes alone never restart
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));

    std::fs::write(temp_dir.path().join("app.py"), "print(1)").unwrap();

    assert_eq!(next_state(&mut changes).await, LifecycleState::Stopping);
    assert_eq!(next_state(&mut changes).await, LifecycleState::Starting);
    assert_eq!(next_state(&mut changes).await, LifecycleState::Running);
    assert!(temp_dir.path().join("flat-out.log").exists());

    supervisor.shutdown_all().await;
}
