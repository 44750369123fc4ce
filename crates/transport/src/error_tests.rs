// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn classification() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
    assert_eq!(
        TransportError::Communication(io).class(),
        ErrorClass::Communication
    );
    assert_eq!(
        TransportError::Corruption("bad header".into()).class(),
        ErrorClass::Corruption
    );
    assert_eq!(
        TransportError::Capacity { needed: 10, capacity: 5 }.class(),
        ErrorClass::Catchall
    );
}

#[parameterized(
    worker_corruption_is_immediately_fatal = { Role::Worker, ErrorClass::Corruption, 1 },
    worker_communication = { Role::Worker, ErrorClass::Communication, 5 },
    supervisor_corruption = { Role::Supervisor, ErrorClass::Corruption, 3 },
    supervisor_communication = { Role::Supervisor, ErrorClass::Communication, 10 },
)]
fn budget_trips_at_threshold(role: Role, class: ErrorClass, threshold: u32) {
    let mut budget = ErrorBudget::new(role);
    for n in 1..threshold {
        assert!(budget.record(class), "failure {n} should still have headroom");
    }
    assert!(!budget.record(class), "failure {threshold} should trip");
}

#[test]
fn workers_fail_earlier_than_the_supervisor() {
    let mut worker = ErrorBudget::new(Role::Worker);
    let mut supervisor = ErrorBudget::new(Role::Supervisor);

    let mut worker_trip = 0;
    while worker.record(ErrorClass::Communication) {
        worker_trip += 1;
    }
    let mut supervisor_trip = 0;
    while supervisor.record(ErrorClass::Communication) {
        supervisor_trip += 1;
    }
    assert!(worker_trip < supervisor_trip);
}

#[test]
fn reset_restores_headroom() {
    let mut budget = ErrorBudget::new(Role::Worker);
    for _ in 0..4 {
        assert!(budget.record(ErrorClass::Communication));
    }
    budget.reset(ErrorClass::Communication);
    assert_eq!(budget.count(ErrorClass::Communication), 0);
    assert!(budget.record(ErrorClass::Communication));
}

#[parameterized(
    first_attempt_is_base = { 0, 100 },
    doubles = { 1, 200 },
    keeps_doubling = { 3, 800 },
    caps_at_eight = { 8, 25_600 },
    stays_capped = { 20, 25_600 },
)]
fn backoff_ladder(attempt: u32, expected_ms: u64) {
    assert_eq!(
        backoff(Duration::from_millis(100), attempt),
        Duration::from_millis(expected_ms)
    );
}
