//! Repository synchronizer unit tests

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{environment, FakeWorkingCopy, Reply, ScriptedExecutor, LOCAL_HEAD, OLD_HEAD};
use fleetguard::deploy::git::{commits_match, RepositorySynchronizer};
use fleetguard::errors::{FailureKind, GuardError};
use fleetguard::remote::executor::Timeouts;

fn synchronizer(executor: Arc<ScriptedExecutor>, working_copy: FakeWorkingCopy) -> RepositorySynchronizer {
    RepositorySynchronizer::new(executor, Arc::new(working_copy), Timeouts::default())
}

#[tokio::test]
async fn test_sync_short_circuits_when_remote_matches() {
    let executor = ScriptedExecutor::new();
    executor.on("git rev-parse HEAD", vec![Reply::ok(LOCAL_HEAD)]);
    let sync = synchronizer(executor.clone(), FakeWorkingCopy::default());

    let result = sync
        .sync(&environment("staging"), LOCAL_HEAD, false)
        .await
        .unwrap();

    assert!(result.already_synced);
    assert_eq!(result.current_commit, LOCAL_HEAD);
    assert_eq!(
        executor.commands(),
        vec!["cd '/srv/app' && git rev-parse HEAD".to_string()]
    );
}

#[tokio::test]
async fn test_sync_fetches_and_resets_then_reaches_fixpoint() {
    let executor = ScriptedExecutor::new();
    executor.on(
        "git rev-parse HEAD",
        vec![Reply::ok(OLD_HEAD), Reply::ok(LOCAL_HEAD)],
    );
    let sync = synchronizer(executor.clone(), FakeWorkingCopy::default());
    let env = environment("staging");

    let result = sync.sync(&env, LOCAL_HEAD, false).await.unwrap();
    assert!(!result.already_synced);
    assert_eq!(result.previous_commit, OLD_HEAD);
    assert_eq!(result.current_commit, LOCAL_HEAD);
    assert_eq!(
        executor.commands(),
        vec![
            "cd '/srv/app' && git rev-parse HEAD".to_string(),
            "cd '/srv/app' && git fetch 'origin' --force".to_string(),
            "cd '/srv/app' && git reset --hard 'origin/main'".to_string(),
            "cd '/srv/app' && git rev-parse HEAD".to_string(),
        ]
    );

    // A second sync to the same commit is a no-op
    let again = sync.sync(&env, LOCAL_HEAD, false).await.unwrap();
    assert!(again.already_synced);
    assert_eq!(executor.count("git fetch"), 1);
}

#[tokio::test]
async fn test_force_sync_ignores_matching_head() {
    let executor = ScriptedExecutor::new();
    executor.on("git rev-parse HEAD", vec![Reply::ok(LOCAL_HEAD)]);
    let sync = synchronizer(executor.clone(), FakeWorkingCopy::default());

    let result = sync
        .sync(&environment("staging"), LOCAL_HEAD, true)
        .await
        .unwrap();

    assert!(!result.already_synced);
    assert_eq!(executor.count("git fetch"), 1);
    assert_eq!(executor.count("git reset --hard"), 1);
}

#[tokio::test]
async fn test_sync_mismatch_after_reset_is_sync_error() {
    let executor = ScriptedExecutor::new();
    executor.on("git rev-parse HEAD", vec![Reply::ok(OLD_HEAD)]);
    let sync = synchronizer(executor, FakeWorkingCopy::default());

    let err = sync
        .sync(&environment("staging"), LOCAL_HEAD, false)
        .await
        .unwrap_err();

    assert!(matches!(err, GuardError::Sync(_)), "{err:?}");
}

#[tokio::test]
async fn test_sync_propagates_executor_failure_kind() {
    let executor = ScriptedExecutor::new();
    executor.on("git rev-parse HEAD", vec![Reply::ok(OLD_HEAD)]);
    executor.on(
        "git fetch",
        vec![Reply::fail(128, "fatal: unable to access: Failed to connect to github.com port 443: Connection refused")],
    );
    let sync = synchronizer(executor, FakeWorkingCopy::default());

    let err = sync
        .sync(&environment("staging"), LOCAL_HEAD, false)
        .await
        .unwrap_err();

    assert_eq!(err.failure_kind(), FailureKind::ConnectionRefused);
}

#[tokio::test]
async fn test_checksum_mismatch_is_a_warning() {
    let executor = ScriptedExecutor::new();
    executor.on(
        "git rev-parse HEAD",
        vec![Reply::ok(OLD_HEAD), Reply::ok(LOCAL_HEAD)],
    );
    executor.on("sha256sum -- 'package.json'", vec![Reply::ok("ffff  package.json")]);
    executor.on("sha256sum -- 'server.js'", vec![Reply::ok("aaaa  server.js")]);

    let working_copy = FakeWorkingCopy {
        digests: HashMap::from([
            ("package.json".to_string(), "eeee".to_string()),
            ("server.js".to_string(), "aaaa".to_string()),
        ]),
        ..Default::default()
    };
    let sync = synchronizer(executor, working_copy);
    let mut env = environment("staging");
    env.critical_files = vec!["package.json".to_string(), "server.js".to_string()];

    let result = sync.sync(&env, LOCAL_HEAD, false).await.unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("package.json: checksum mismatch"));
}

#[tokio::test]
async fn test_rollback_to_parent() {
    let executor = ScriptedExecutor::new();
    executor.on(
        "git rev-parse HEAD",
        vec![Reply::ok(LOCAL_HEAD), Reply::ok(OLD_HEAD)],
    );
    executor.on("git rev-parse HEAD~1", vec![Reply::ok(OLD_HEAD)]);
    let sync = synchronizer(executor.clone(), FakeWorkingCopy::default());

    let (from, to) = sync
        .rollback_to_parent(&environment("staging"))
        .await
        .unwrap();

    assert_eq!(from, LOCAL_HEAD);
    assert_eq!(to, OLD_HEAD);
    assert_eq!(
        executor.count(&format!("git reset --hard '{}'", OLD_HEAD)),
        1
    );
}

#[tokio::test]
async fn test_rollback_without_parent_fails() {
    let executor = ScriptedExecutor::new();
    executor.on("git rev-parse HEAD", vec![Reply::ok(LOCAL_HEAD)]);
    executor.on(
        "git rev-parse HEAD~1",
        vec![Reply::fail(128, "fatal: ambiguous argument 'HEAD~1': unknown revision")],
    );
    let sync = synchronizer(executor.clone(), FakeWorkingCopy::default());

    let err = sync
        .rollback_to_parent(&environment("staging"))
        .await
        .unwrap_err();

    assert!(matches!(err, GuardError::Sync(_)));
    assert_eq!(executor.count("git reset"), 0);
}

#[test]
fn test_commits_match_abbreviations() {
    assert!(commits_match(LOCAL_HEAD, LOCAL_HEAD));
    assert!(commits_match("1111111", LOCAL_HEAD));
    assert!(!commits_match("111111", LOCAL_HEAD));
    assert!(!commits_match(OLD_HEAD, LOCAL_HEAD));
    assert!(!commits_match("", LOCAL_HEAD));
}
