//! Deployment pipeline unit tests

mod common;

use common::{
    environment, failing_endpoints, harness, healthy_endpoints, FakeWorkingCopy, Reply,
    LOCAL_HEAD, OLD_HEAD,
};
use fleetguard::app::options::Command;
use fleetguard::app::run::run;
use fleetguard::audit::AuditLog;
use fleetguard::deploy::fsm::DeploymentPhase;
use fleetguard::errors::GuardError;
use fleetguard::filesys::file::File;
use fleetguard::models::deployment::{DeployOptions, LogLevel, RunOutcome};

fn rollback_options() -> DeployOptions {
    DeployOptions {
        auto_rollback: true,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_deploy_runs_phases_in_order() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, LOCAL_HEAD);
    h.executor.on(
        "git rev-parse HEAD",
        vec![Reply::ok(OLD_HEAD), Reply::ok(LOCAL_HEAD)],
    );
    healthy_endpoints(&h.probe);

    let run = h
        .state
        .orchestrator
        .deploy(&environment("staging"), DeployOptions::default())
        .await
        .unwrap();

    assert_eq!(run.outcome, RunOutcome::Succeeded);
    assert_eq!(run.local_commit.as_deref(), Some(LOCAL_HEAD));
    assert_eq!(run.local_branch.as_deref(), Some("main"));
    assert!(run.finished_at.is_some());
    assert_eq!(
        run.phases(),
        vec![
            DeploymentPhase::PreCheck,
            DeploymentPhase::Sync,
            DeploymentPhase::Deploy,
            DeploymentPhase::Validate,
            DeploymentPhase::Done,
        ]
    );

    let commands = h.executor.commands();
    let position = |pattern: &str| commands.iter().position(|c| c.contains(pattern)).unwrap();
    assert!(position("git fetch") < position("git reset --hard"));
    assert!(position("git reset --hard") < position("pkill -f 'node server.js'"));
    assert!(position("pkill -f") < position("nohup sh -c 'npm start'"));
    assert_eq!(h.executor.count("rm -rf"), 0);
    assert_eq!(h.probe.probed().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_no_cache_clears_cache_dirs() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, LOCAL_HEAD);
    healthy_endpoints(&h.probe);

    let options = DeployOptions {
        no_cache: true,
        ..Default::default()
    };
    let run = h
        .state
        .orchestrator
        .deploy(&environment("staging"), options)
        .await
        .unwrap();

    assert_eq!(run.outcome, RunOutcome::Succeeded);
    // Remote already at the target: only the HEAD read for sync
    assert_eq!(h.executor.count("git fetch"), 0);
    assert_eq!(h.executor.count("cd '/srv/app' && rm -rf -- '.next'"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_uncommitted_changes_only_warn() {
    let working_copy = FakeWorkingCopy {
        dirty: true,
        ..Default::default()
    };
    let h = harness(working_copy, AuditLog::disabled());
    common::healthy_remote(&h.executor, LOCAL_HEAD);
    healthy_endpoints(&h.probe);

    let run = h
        .state
        .orchestrator
        .deploy(&environment("staging"), DeployOptions::default())
        .await
        .unwrap();

    assert_eq!(run.outcome, RunOutcome::Succeeded);
    assert!(run.log.iter().any(|e| e.phase == DeploymentPhase::PreCheck
        && e.level == LogLevel::Warn
        && e.message.contains("Uncommitted")));
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_without_rollback() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, LOCAL_HEAD);
    failing_endpoints(&h.probe);

    let failure = h
        .state
        .orchestrator
        .deploy(&environment("staging"), DeployOptions::default())
        .await
        .unwrap_err();

    assert_eq!(failure.run.outcome, RunOutcome::Failed);
    match &failure.error {
        GuardError::Validation { result, .. } => {
            assert_eq!(result.healthy_count, 0);
            assert_eq!(result.endpoints.len(), 4);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    let fails = failure
        .run
        .log
        .iter()
        .filter(|e| e.message.starts_with("FAIL"))
        .count();
    assert_eq!(fails, 4);
    assert_eq!(h.executor.count("HEAD~1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_validation_rolls_back_to_parent() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, LOCAL_HEAD);
    h.executor.on(
        "git rev-parse HEAD",
        vec![
            Reply::ok(OLD_HEAD),
            Reply::ok(LOCAL_HEAD),
            Reply::ok(LOCAL_HEAD),
            Reply::ok(OLD_HEAD),
        ],
    );
    h.executor.on("git rev-parse HEAD~1", vec![Reply::ok(OLD_HEAD)]);
    h.probe.on("/", vec![500, 200]);
    h.probe.on("/health", vec![500, 200]);
    h.probe.on("/login", vec![500, 200]);
    h.probe.on("/admin", vec![500, 302]);

    let failure = h
        .state
        .orchestrator
        .deploy(&environment("staging"), rollback_options())
        .await
        .unwrap_err();

    assert_eq!(failure.run.outcome, RunOutcome::RolledBack);
    assert!(matches!(failure.error, GuardError::Validation { .. }));
    assert!(failure.run.phases().contains(&DeploymentPhase::RollbackAttempt));
    assert_eq!(failure.run.phases().last(), Some(&DeploymentPhase::Done));
    assert_eq!(h.executor.count(&format!("git reset --hard '{}'", OLD_HEAD)), 1);
    // Restarted once for the deploy and once for the rollback
    assert_eq!(h.executor.count("nohup"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_rollback_is_fatal() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, LOCAL_HEAD);
    h.executor.on(
        "git rev-parse HEAD",
        vec![
            Reply::ok(LOCAL_HEAD),
            Reply::ok(LOCAL_HEAD),
            Reply::ok(OLD_HEAD),
        ],
    );
    h.executor.on("git rev-parse HEAD~1", vec![Reply::ok(OLD_HEAD)]);
    failing_endpoints(&h.probe);

    let failure = h
        .state
        .orchestrator
        .deploy(&environment("staging"), rollback_options())
        .await
        .unwrap_err();

    assert_eq!(failure.run.outcome, RunOutcome::Fatal);
    match &failure.error {
        GuardError::Fatal(message) => {
            assert!(message.contains("deployment failed"));
            assert!(message.contains("rollback failed"));
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
    // Single-depth: the rollback is never rolled back
    assert_eq!(h.executor.count("HEAD~1"), 1);
    assert_eq!(failure.run.phases().last(), Some(&DeploymentPhase::Fatal));
}

#[tokio::test(start_paused = true)]
async fn test_sync_failure_stops_before_deploy() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, OLD_HEAD);
    healthy_endpoints(&h.probe);

    let failure = h
        .state
        .orchestrator
        .deploy(&environment("staging"), DeployOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, GuardError::Sync(_)));
    assert_eq!(failure.run.outcome, RunOutcome::Failed);
    assert_eq!(h.executor.count("nohup"), 0);
    assert!(h.probe.probed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_deploy_is_not_rolled_back() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, OLD_HEAD);
    h.executor.on("git rev-parse HEAD", vec![Reply::Hang]);
    h.cancel.cancel();

    let failure = h
        .state
        .orchestrator
        .deploy(&environment("staging"), rollback_options())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, GuardError::Cancelled));
    assert_eq!(failure.run.outcome, RunOutcome::Failed);
    assert_eq!(h.executor.count("HEAD~1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_deploys_of_one_target_fail_fast() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    h.executor.on("git rev-parse HEAD", vec![Reply::Hang]);
    let env = environment("staging");

    let (first, second) = tokio::join!(
        h.state.orchestrator.deploy(&env, DeployOptions::default()),
        h.state.orchestrator.deploy(&env, DeployOptions::default()),
    );

    // The first holds the lock until its sync times out
    assert!(matches!(first.unwrap_err().error, GuardError::Timeout { .. }));
    let second = second.unwrap_err();
    assert!(matches!(second.error, GuardError::LockTimeout { .. }));
    assert!(second.run.local_commit.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deploy_reason_is_audited() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let h = harness(FakeWorkingCopy::default(), AuditLog::new(File::new(&path)));
    common::healthy_remote(&h.executor, LOCAL_HEAD);
    healthy_endpoints(&h.probe);

    let options = DeployOptions {
        reason: Some("hotfix login redirect".to_string()),
        ..Default::default()
    };
    let run = h
        .state
        .orchestrator
        .deploy(&environment("staging"), options)
        .await
        .unwrap();
    assert_eq!(run.reason.as_deref(), Some("hotfix login redirect"));

    let contents = std::fs::read_to_string(&path).unwrap();
    let deploy_entries: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .filter(|entry| entry["key"] == "deploy:staging")
        .collect();

    assert_eq!(deploy_entries.len(), 2);
    assert_eq!(deploy_entries[0]["outcome"], "started");
    assert_eq!(deploy_entries[0]["detail"], "hotfix login redirect");
    assert_eq!(deploy_entries[1]["outcome"], "succeeded");
}

#[tokio::test(start_paused = true)]
async fn test_health_check_command_reports_unhealthy() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    failing_endpoints(&h.probe);

    let err = run(
        &h.state,
        Command::HealthCheck {
            target: "staging".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GuardError::Validation { .. }));

    healthy_endpoints(&h.probe);
    run(
        &h.state,
        Command::HealthCheck {
            target: "staging".to_string(),
        },
    )
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_guardian_commands() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    common::healthy_remote(&h.executor, LOCAL_HEAD);

    run(
        &h.state,
        Command::GuardianTest {
            target: "staging".to_string(),
        },
    )
    .await
    .unwrap();
    run(
        &h.state,
        Command::GuardianStart {
            target: "staging".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(h.executor.count("pkill -f 'node server.js'"), 1);
    assert_eq!(h.executor.count("nohup"), 1);
    assert!(h.state.guardian.last_success(
        fleetguard::guardian::state::OperationKind::Restart,
        "staging"
    ).is_some());
}

#[tokio::test]
async fn test_unknown_environment() {
    let h = harness(FakeWorkingCopy::default(), AuditLog::disabled());
    let err = run(
        &h.state,
        Command::GuardianTest {
            target: "production".to_string(),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, GuardError::NotFound(_)));
    assert!(h.executor.commands().is_empty());
}
