//! Process lifecycle commands run under a real shell

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{environment, LocalShell};
use fleetguard::deploy::process::{ProcessManager, RestartOptions};
use fleetguard::models::environment::Environment;
use fleetguard::remote::executor::{RemoteExecutor, Timeouts};

const TIMEOUTS: Timeouts = Timeouts {
    command: Duration::from_secs(5),
    build: Duration::from_secs(5),
};

fn manager() -> ProcessManager {
    ProcessManager::new(Arc::new(LocalShell), TIMEOUTS, CancellationToken::new())
}

/// Environment rooted at `dir`; the bracketed pattern never matches the
/// shell running `pkill` itself
fn local_environment(dir: &Path, seconds: u32) -> Environment {
    let mut env = environment("local");
    env.path = dir.to_str().unwrap().to_string();
    env.start_command = format!("sleep {}", seconds);
    env.process_pattern = format!("[s]leep {}", seconds);
    env
}

async fn cleanup(env: &Environment) {
    let _ = LocalShell
        .execute(
            &env.target(),
            &format!("pkill -f '{}'", env.process_pattern),
            TIMEOUTS.command,
        )
        .await;
}

#[tokio::test]
async fn test_launch_returns_while_app_keeps_running() {
    let dir = tempfile::tempdir().unwrap();
    let env = local_environment(dir.path(), 4101);

    let pid = manager().launch(&env).await.unwrap();
    let pid = pid.expect("pid printed by the launch command");

    // The app outlives the launching shell
    let alive = LocalShell
        .execute(&env.target(), &format!("kill -0 {}", pid), TIMEOUTS.command)
        .await;
    assert!(alive.is_ok(), "{alive:?}");
    assert!(Path::new(&env.log_file()).exists());

    cleanup(&env).await;
}

#[tokio::test]
async fn test_stop_without_match_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = local_environment(dir.path(), 4102);
    env.process_pattern = "[f]leetguard-no-such-process".to_string();

    let stopped = manager().stop(&env).await.unwrap();

    assert!(!stopped);
}

#[tokio::test]
async fn test_restart_then_stop() {
    let dir = tempfile::tempdir().unwrap();
    let env = local_environment(dir.path(), 4103);
    let options = RestartOptions {
        clear_cache: false,
        settle_delay: Some(Duration::ZERO),
    };

    let outcome = manager().restart(&env, &options).await.unwrap();
    assert!(!outcome.killed_existing);
    assert!(outcome.pid.is_some());

    let stopped = manager().stop(&env).await.unwrap();
    assert!(stopped);

    cleanup(&env).await;
}

#[tokio::test]
async fn test_clear_cache_removes_only_cache_dirs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(".next/cache")).unwrap();
    std::fs::write(dir.path().join(".next/cache/chunk.js"), "x").unwrap();
    std::fs::create_dir_all(dir.path().join("dist")).unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/server.js"), "x").unwrap();

    let mut env = local_environment(dir.path(), 4104);
    env.cache_dirs = vec![".next".to_string(), "dist".to_string()];

    manager().clear_cache(&env).await.unwrap();

    assert!(!dir.path().join(".next").exists());
    assert!(!dir.path().join("dist").exists());
    assert!(dir.path().join("src/server.js").exists());
}

#[tokio::test]
async fn test_launch_in_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let env = local_environment(&dir.path().join("absent"), 4105);

    let result = manager().launch(&env).await;

    assert!(result.is_err());
}
