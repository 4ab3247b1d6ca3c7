// End-to-end supervision through an ecosystem file

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;
use vigil::config::SupervisorSettings;
use vigil::error::VigilError;
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

#[tokio::test]
async fn test_crash_loop_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "crasher"
        script = "/bin/sh"
        args = ["-c", "exit 1"]
        max_restarts = 2
        restart_delay = 100
        "#,
    );
    let mut changes = supervisor.subscribe("crasher").unwrap();

    supervisor.start("crasher").await.unwrap();

    let mut seen = Vec::new();
    loop {
        let state = next_state(&mut changes).await;
        seen.push(state);
        if state == LifecycleState::PermanentlyStopped {
            break;
        }
    }

    use LifecycleState::*;
    assert_eq!(
        seen,
        vec![
            Starting,
            Running,
            RestartPending,
            Starting,
            Running,
            RestartPending,
            Starting,
            Running,
            PermanentlyStopped,
        ]
    );

    let status = supervisor.status("crasher").await.unwrap();
    assert_eq!(status.restart_count, 2);
    assert_eq!(status.last_exit_code, Some(1));
    assert_eq!(status.pid, None);

    // Only reset leaves the permanently stopped state
    assert!(matches!(
        supervisor.start("crasher").await,
        Err(VigilError::InvalidState(_, _))
    ));
    supervisor.reset("crasher").await.unwrap();

    let status = supervisor.status("crasher").await.unwrap();
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.restart_count, 0);

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_output_is_captured_with_timestamps() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "talker"
        script = "/bin/sh"
        args = ["-c", "echo hello; echo oops >&2; echo bye"]
        autorestart = false
        log_date_format = "YYYY"
        "#,
    );
    let mut changes = supervisor.subscribe("talker").unwrap();

    supervisor.start("talker").await.unwrap();
    while next_state(&mut changes).await != LifecycleState::Stopped {}

    let year = chrono::Local::now().format("%Y").to_string();
    let out_path = temp_dir.path().join("logs/talker-out.log");
    let err_path = temp_dir.path().join("logs/talker-error.log");

    // The pumps may still be flushing the last line
    let mut out = String::new();
    for _ in 0..50 {
        out = std::fs::read_to_string(&out_path).unwrap_or_default();
        if out.lines().count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(out, format!("[{year}] hello\n[{year}] bye\n"));
    let err = std::fs::read_to_string(&err_path).unwrap();
    assert_eq!(err, format!("[{year}] oops\n"));

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_logs_are_appended_across_launches() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "repeat"
        script = "/bin/sh"
        args = ["-c", "echo run"]
        autorestart = false
        output = "run.log"
        "#,
    );
    let mut changes = supervisor.subscribe("repeat").unwrap();

    for _ in 0..2 {
        supervisor.start("repeat").await.unwrap();
        while next_state(&mut changes).await != LifecycleState::Stopped {}
    }

    let log_path = temp_dir.path().join("run.log");
    let mut lines = 0;
    for _ in 0..50 {
        lines = std::fs::read_to_string(&log_path)
            .unwrap_or_default()
            .lines()
            .filter(|line| line.ends_with("] run"))
            .count();
        if lines == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(lines, 2);

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_missing_cwd_is_reported_as_launch_error() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "nowhere"
        script = "/bin/true"
        cwd = "does-not-exist"
        autorestart = false
        "#,
    );

    let result = supervisor.start("nowhere").await;
    let error = result.unwrap_err();
    assert!(matches!(error, VigilError::LaunchError(_)));
    assert_eq!(error.kind().exit_code(), 3);

    let status = supervisor.status("nowhere").await.unwrap();
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.last_exit_code, Some(-1));
    assert!(status.last_error.unwrap().contains("does-not-exist"));

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_restart_running_app_replaces_child() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "server"
        script = "/bin/sleep"
        args = ["30"]
        "#,
    );

    supervisor.start("server").await.unwrap();
    let first = supervisor.status("server").await.unwrap().pid.unwrap();

    supervisor.restart("server").await.unwrap();
    let status = supervisor.status("server").await.unwrap();
    assert_eq!(status.state, LifecycleState::Running);
    assert_ne!(status.pid.unwrap(), first);
    assert_eq!(status.restart_count, 0);

    supervisor.shutdown_all().await;
}
