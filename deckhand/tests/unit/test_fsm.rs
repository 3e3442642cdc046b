//! FSM unit tests

use deckhand::jobs::fsm::{JobEvent, JobFsm, JobState, Outcome};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_fsm_initial_state() {
    let fsm = JobFsm::new();
    assert_eq!(fsm.state(), JobState::Received);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_terminated());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = JobFsm::new();

    // Received -> Validated
    assert_ok!(fsm.process(JobEvent::Accept));
    assert_eq!(fsm.state(), JobState::Validated);

    // Validated -> InProgress
    assert_ok!(fsm.process(JobEvent::Start));
    assert_eq!(fsm.state(), JobState::InProgress);

    // InProgress -> Terminated
    assert_ok!(fsm.process(JobEvent::Succeed));
    assert_eq!(fsm.state(), JobState::Terminated(Outcome::Success));
    assert!(fsm.is_terminated());
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = JobFsm::new();

    fsm.process(JobEvent::Accept).unwrap();
    fsm.process(JobEvent::Start).unwrap();
    fsm.process(JobEvent::Fail("10.0.0.2".to_string())).unwrap();

    assert_eq!(fsm.state(), JobState::Terminated(Outcome::Failure));
    assert_eq!(fsm.error(), Some("10.0.0.2"));
}

#[test]
fn test_fsm_rejected_never_starts() {
    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Reject("Missing required field: version".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), JobState::Rejected);
    assert_eq!(fsm.error(), Some("Missing required field: version"));
    assert!(!fsm.is_terminated());

    assert!(fsm.process(JobEvent::Start).is_err());
    assert_eq!(fsm.state(), JobState::Rejected);
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = JobFsm::new();

    // Cannot start before validation
    assert_err!(fsm.process(JobEvent::Start));
    // Cannot terminate before starting
    assert_err!(fsm.process(JobEvent::Succeed));
    assert_eq!(fsm.state(), JobState::Received);

    fsm.process(JobEvent::Accept).unwrap();
    fsm.process(JobEvent::Start).unwrap();
    fsm.process(JobEvent::Succeed).unwrap();

    // Terminated is final
    assert!(fsm.process(JobEvent::Fail("late".to_string())).is_err());
    assert_eq!(fsm.state(), JobState::Terminated(Outcome::Success));
}
