use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use vigil::config::SupervisorSettings;
use vigil::process::{LifecycleState, MemorySampler, Supervisor};

fn load(dir: &Path, contents: &str) -> Supervisor {
    let config_path = dir.join("ecosystem.toml");
    std::fs::write(&config_path, contents).unwrap();
    Supervisor::load(&config_path, SupervisorSettings::default()).unwrap()
}

#[tokio::test]
async fn test_graceful_shutdown_with_sigterm() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "sigterm-test"
        script = "/bin/sleep"
        args = ["30"]
        stop_signal = "SIGTERM"
        "#,
    );

    supervisor.start("sigterm-test").await.unwrap();
    let status = supervisor.status("sigterm-test").await.unwrap();
    assert_eq!(status.state, LifecycleState::Running);
    let pid = status.pid.unwrap();

    supervisor.stop("sigterm-test").await.unwrap();

    let status = supervisor.status("sigterm-test").await.unwrap();
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.pid, None);
    assert_eq!(status.last_exit_code, Some(128 + 15));
    assert!(status.last_error.is_none());
    assert!(!MemorySampler::new().is_process_alive(pid));

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_graceful_shutdown_with_sigint() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "sigint-test"
        script = "/bin/sleep"
        args = ["30"]
        stop_signal = "SIGINT"
        "#,
    );

    supervisor.start("sigint-test").await.unwrap();
    supervisor.stop("sigint-test").await.unwrap();

    let status = supervisor.status("sigint-test").await.unwrap();
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.last_exit_code, Some(128 + 2));

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_forced_kill_after_kill_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "stubborn"
        script = "/bin/sh"
        args = ["-c", "trap '' TERM; sleep 30"]
        kill_timeout = 300
        "#,
    );

    supervisor.start("stubborn").await.unwrap();
    // Let the shell install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    supervisor.stop("stubborn").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));

    let status = supervisor.status("stubborn").await.unwrap();
    assert_eq!(status.state, LifecycleState::Stopped);
    assert_eq!(status.last_exit_code, Some(128 + 9));
    assert!(status.last_error.is_some());

    // A forced kill is not fatal; the app can be started again
    supervisor.start("stubborn").await.unwrap();
    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_shutdown_all_terminates_every_child() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        [[apps]]
        name = "first"
        script = "/bin/sleep"
        args = ["30"]

        [[apps]]
        name = "second"
        script = "/bin/sh"
        args = ["-c", "sleep 30"]

        [[apps]]
        name = "third"
        script = "/bin/sleep"
        args = ["30"]
        autorestart = false
        "#,
    );

    supervisor.start_all().await;

    let mut pids = Vec::new();
    for status in supervisor.list().await {
        assert_eq!(status.state, LifecycleState::Running, "{}", status.name);
        pids.push(status.pid.unwrap());
    }
    assert_eq!(pids.len(), 3);

    supervisor.shutdown_all().await;

    let mut sampler = MemorySampler::new();
    for pid in pids {
        assert!(!sampler.is_process_alive(pid), "pid {} survived", pid);
    }
}

#[tokio::test]
async fn test_shutdown_cancels_pending_restart() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = load(
        temp_dir.path(),
        r#"
        name = "crasher"
        script = "/bin/sh"
        args = ["-c", "exit 1"]
        restart_delay = 60000
        "#,
    );
    let mut changes = supervisor.subscribe("crasher").unwrap();

    supervisor.start("crasher").await.unwrap();
    loop {
        let change = tokio::time::timeout(Duration::from_secs(10), changes.recv())
            .await
            .unwrap()
            .unwrap();
        if change.to == LifecycleState::RestartPending {
            break;
        }
    }

    // Returns promptly instead of waiting out the delay
    tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown_all())
        .await
        .unwrap();
}
