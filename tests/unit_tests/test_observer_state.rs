// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::{Duration, Instant};

use linewatch_rs::{
    connection::observable::ObservableConnection,
    errors::ObserveError,
    observer::state::{ObserverState, ObserverStatus},
};

fn fresh_state(name: &str) -> ObserverState {
    let connection = ObservableConnection::new();
    ObserverState::new(name, &connection)
}

#[test]
fn test_arming_starts_the_lifetime() {
    let state = fresh_state("armed");
    assert_eq!(state.status(), ObserverStatus::New);
    assert!(state.start_time().is_none());
    assert!(state.deadline().is_none());

    let at = Instant::now();
    state.arm(at);
    assert_eq!(state.status(), ObserverStatus::Armed);
    assert_eq!(state.start_time(), Some(at));
    assert_eq!(state.deadline(), Some(at + state.timeout()));
}

#[test]
fn test_rearming_moves_the_start_instant() {
    let state = fresh_state("rearmed");
    let first = Instant::now();
    state.arm(first);
    let second = first + Duration::from_millis(5);
    state.arm(second);
    assert_eq!(state.start_time(), Some(second));
}

#[test]
fn test_success_is_sticky_first_wins() {
    let state = fresh_state("first-wins-ok");
    state.arm(Instant::now());

    assert!(state.succeed());
    assert_eq!(state.status(), ObserverStatus::DoneOk);

    // later transitions are silent no-ops
    assert!(!state.succeed());
    assert!(!state.fail(ObserveError::CommandFailure {
        observer: "first-wins-ok".to_string(),
        reason: "late".to_string(),
    }));
    assert!(!state.cancel());
    assert_eq!(state.status(), ObserverStatus::DoneOk);
    assert!(state.result_gate().is_ok());
}

#[test]
fn test_failure_is_sticky_and_resurfaces() {
    let state = fresh_state("first-wins-fail");
    state.arm(Instant::now());

    let failure = ObserveError::Observation {
        observer: "first-wins-fail".to_string(),
        reason: "unknown format".to_string(),
    };
    assert!(state.fail(failure.clone()));
    assert!(!state.succeed());
    assert_eq!(state.status(), ObserverStatus::DoneFail);

    // every retrieval re-raises the same stored failure
    assert_eq!(state.result_gate(), Err(failure.clone()));
    assert_eq!(state.result_gate(), Err(failure));
}

#[test]
fn test_cancel_blocks_later_outcomes() {
    let state = fresh_state("cancelled");
    state.arm(Instant::now());

    assert!(state.cancel());
    assert!(!state.succeed());
    assert_eq!(state.status(), ObserverStatus::Cancelled);
    assert!(matches!(
        state.result_gate(),
        Err(ObserveError::Cancelled { .. })
    ));
}

#[test]
fn test_result_gate_before_terminal() {
    let state = fresh_state("not-ready");
    assert!(matches!(
        state.result_gate(),
        Err(ObserveError::ResultNotReady { .. })
    ));
    state.arm(Instant::now());
    assert!(matches!(
        state.result_gate(),
        Err(ObserveError::ResultNotReady { .. })
    ));
}

#[test]
fn test_timeout_field_is_live() {
    let state = fresh_state("timeout-field");
    state.set_timeout(Duration::from_millis(250));
    assert_eq!(state.timeout(), Duration::from_millis(250));

    let at = Instant::now();
    state.arm(at);
    assert_eq!(state.deadline(), Some(at + Duration::from_millis(250)));

    // widening after arming moves the deadline, the start stays
    state.set_timeout(Duration::from_millis(400));
    assert_eq!(state.deadline(), Some(at + Duration::from_millis(400)));
}
