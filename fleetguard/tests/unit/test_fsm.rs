//! Phase FSM unit tests

use fleetguard::deploy::fsm::{DeploymentPhase, PhaseEvent, PhaseFsm};

#[test]
fn test_fsm_initial_state() {
    let fsm = PhaseFsm::new();
    assert_eq!(fsm.phase(), DeploymentPhase::PreCheck);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.rollback_count(), 0);
}

#[test]
fn test_fsm_forward_flow() {
    let mut fsm = PhaseFsm::new();

    // PreCheck -> Sync -> Deploy -> Validate -> Done
    assert_eq!(fsm.process(PhaseEvent::Advance).unwrap(), DeploymentPhase::Sync);
    assert_eq!(fsm.process(PhaseEvent::Advance).unwrap(), DeploymentPhase::Deploy);
    assert_eq!(fsm.process(PhaseEvent::Advance).unwrap(), DeploymentPhase::Validate);
    assert_eq!(fsm.process(PhaseEvent::Advance).unwrap(), DeploymentPhase::Done);
    assert!(fsm.phase().is_terminal());
    assert!(!fsm.rolled_back());
}

#[test]
fn test_fsm_failure_without_rollback() {
    let mut fsm = PhaseFsm::new();

    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Fail("fetch failed".to_string())).unwrap();

    assert_eq!(fsm.phase(), DeploymentPhase::Failed);
    assert_eq!(fsm.error(), Some("fetch failed"));
    assert_eq!(fsm.rollback_count(), 0);
}

#[test]
fn test_fsm_rollback_success() {
    let mut fsm = PhaseFsm::new();
    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Advance).unwrap();

    fsm.process(PhaseEvent::Rollback("2/4 endpoints healthy".to_string()))
        .unwrap();
    assert_eq!(fsm.phase(), DeploymentPhase::RollbackAttempt);
    assert_eq!(fsm.rollback_count(), 1);

    fsm.process(PhaseEvent::Advance).unwrap();
    assert_eq!(fsm.phase(), DeploymentPhase::Done);
    assert!(fsm.rolled_back());
}

#[test]
fn test_fsm_rollback_failure_is_fatal() {
    let mut fsm = PhaseFsm::new();
    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Advance).unwrap();

    fsm.process(PhaseEvent::Rollback("restart failed".to_string()))
        .unwrap();
    fsm.process(PhaseEvent::Fail("parent missing".to_string()))
        .unwrap();

    assert_eq!(fsm.phase(), DeploymentPhase::Fatal);
    assert_eq!(
        fsm.error(),
        Some("restart failed; rollback failed: parent missing")
    );
}

#[test]
fn test_fsm_rollback_is_single_depth() {
    let mut fsm = PhaseFsm::new();
    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Rollback("first".to_string())).unwrap();

    // No rollback from inside a rollback
    assert!(fsm.process(PhaseEvent::Rollback("second".to_string())).is_err());
    assert_eq!(fsm.phase(), DeploymentPhase::RollbackAttempt);
    assert_eq!(fsm.rollback_count(), 1);
}

#[test]
fn test_fsm_no_rollback_from_pre_check() {
    let mut fsm = PhaseFsm::new();
    assert!(fsm.process(PhaseEvent::Rollback("dirty".to_string())).is_err());
    assert_eq!(fsm.phase(), DeploymentPhase::PreCheck);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = PhaseFsm::new();
    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Advance).unwrap();
    fsm.process(PhaseEvent::Advance).unwrap();

    // Terminal phases accept nothing
    let result = fsm.process(PhaseEvent::Advance);
    assert!(result.is_err());
    assert!(fsm.process(PhaseEvent::Fail("late".to_string())).is_err());
    assert_eq!(fsm.phase(), DeploymentPhase::Done);
}
