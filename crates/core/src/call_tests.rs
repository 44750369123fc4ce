// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::strategies::any_status;
use proptest::prelude::*;
use serde_json::json;
use yare::parameterized;

fn fresh(id: u64) -> Call {
    Call::new(CallId(id), "square", json!({"x": 3}), 100)
}

#[test]
fn new_call_starts_uncalled() {
    let call = fresh(2);
    assert_eq!(call.status, CallStatus::Uncalled);
    assert_eq!(call.times.uncalled, Some(100));
    assert_eq!(call.retries, 0);
    assert!(call.is_active());
    assert!(!call.collected);
}

#[test]
fn forward_transitions_record_times_in_order() {
    let mut call = fresh(2);
    call.transition(CallStatus::Called, 200).unwrap();
    call.transition(CallStatus::Running, 300).unwrap();
    call.transition(CallStatus::Returned, 400).unwrap();

    assert_eq!(call.times.uncalled, Some(100));
    assert_eq!(call.times.called, Some(200));
    assert_eq!(call.times.running, Some(300));
    assert_eq!(call.times.returned, Some(400));
    assert!(!call.is_active());
}

#[parameterized(
    called_to_uncalled_is_reset = { CallStatus::Called, CallStatus::Uncalled, true },
    running_back_to_called = { CallStatus::Running, CallStatus::Called, false },
    returned_back_to_running = { CallStatus::Returned, CallStatus::Running, false },
    timeout_back_to_returned = { CallStatus::Timeout, CallStatus::Returned, false },
    running_to_timeout = { CallStatus::Running, CallStatus::Timeout, true },
    same_status_is_allowed = { CallStatus::Running, CallStatus::Running, true },
)]
fn transition_legality(from: CallStatus, to: CallStatus, ok: bool) {
    let mut call = Call::builder().status(from).args(json!({"x": 3})).build();
    let result = call.transition(to, 500);
    assert_eq!(result.is_ok(), ok, "{from} -> {to}");
}

#[test]
fn illegal_transition_leaves_state_unchanged() {
    let mut call = fresh(2);
    call.transition(CallStatus::Running, 200).unwrap();
    let err = call.transition(CallStatus::Called, 300).unwrap_err();

    assert!(matches!(err, CallError::IllegalTransition { .. }));
    assert_eq!(call.status, CallStatus::Running);
    assert_eq!(call.times.called, None);
}

#[test]
fn retry_resets_to_uncalled_and_counts() {
    let mut call = fresh(2);
    call.transition(CallStatus::Running, 200).unwrap();
    call.transition(CallStatus::Timeout, 300).unwrap();
    call.errors = 2;
    call.worker_pid = Some(41);

    assert_eq!(call.retry(400), Ok(1));
    assert_eq!(call.status, CallStatus::Uncalled);
    assert_eq!(call.times.uncalled, Some(400));
    assert_eq!(call.errors, 0);
    assert_eq!(call.worker_pid, None);
}

#[test]
fn retry_fails_past_the_ceiling() {
    let mut call = fresh(2);
    for n in 1..=MAX_RETRIES {
        assert_eq!(call.retry(100 + u64::from(n)), Ok(n));
    }
    let err = call.retry(900).unwrap_err();
    assert_eq!(
        err,
        CallError::RetriesExhausted { id: CallId(2), retries: MAX_RETRIES }
    );
    assert_eq!(call.retries, MAX_RETRIES);
}

#[test]
fn runtime_uses_returned_or_now() {
    let mut call = fresh(2);
    assert_eq!(call.runtime(1_000), None);

    call.transition(CallStatus::Running, 1_000).unwrap();
    assert_eq!(call.runtime(3_500), Some(Duration::from_micros(2_500)));

    call.transition(CallStatus::Returned, 5_000).unwrap();
    assert_eq!(call.runtime(9_999), Some(Duration::from_micros(4_000)));
}

#[test]
fn gc_refuses_active_calls() {
    let mut call = fresh(2);
    call.transition(CallStatus::Running, 200).unwrap();
    assert_eq!(call.gc(), Err(CallError::StillActive { id: CallId(2) }));
    assert!(!call.collected);
}

#[test]
fn gc_clears_payloads_and_keeps_the_rest() {
    let mut call = fresh(2);
    call.transition(CallStatus::Running, 200).unwrap();
    call.result = Some(json!(9));
    call.transition(CallStatus::Returned, 300).unwrap();

    call.gc().unwrap();
    assert_eq!(call.args, None);
    assert_eq!(call.result, None);
    assert!(call.collected);
    assert_eq!(call.status, CallStatus::Returned);
    assert_eq!(call.times.returned, Some(300));
}

#[test]
fn header_carries_latest_transition_time() {
    let mut call = fresh(7);
    call.transition(CallStatus::Running, 2_000).unwrap();
    let env = call.header(1234);

    assert_eq!(env.call_id, CallId(7));
    assert_eq!(env.status, CallStatus::Running);
    assert_eq!(env.microtime, 2_000);
    assert_eq!(env.sender_pid, 1234);
}

#[test]
fn serde_round_trip_preserves_protocol_fields() {
    let mut call = fresh(9);
    call.transition(CallStatus::Called, 200).unwrap();
    call.retries = 2;
    call.size = 64;

    let json = serde_json::to_string(&call).unwrap();
    let back: Call = serde_json::from_str(&json).unwrap();

    assert_eq!(back.id, call.id);
    assert_eq!(back.status, CallStatus::Called);
    assert_eq!(back.retries, 2);
    assert_eq!(back.times, call.times);
    assert_eq!(back.args, call.args);
}

proptest! {
    // Monotone-status law: a lower-ranked target other than Uncalled never
    // succeeds and never mutates the call.
    #[test]
    fn backwards_moves_always_rejected(from in any_status(), to in any_status()) {
        let mut call = Call::builder().status(from).args(json!({"x": 3})).build();
        let before = call.clone();
        let result = call.transition(to, 999);

        if to.rank() < from.rank() && to != CallStatus::Uncalled {
            prop_assert!(result.is_err());
            prop_assert_eq!(call.status, before.status);
            prop_assert_eq!(call.times, before.times);
        } else {
            prop_assert!(result.is_ok());
            prop_assert_eq!(call.status, to);
        }
    }
}
