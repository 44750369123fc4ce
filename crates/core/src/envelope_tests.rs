// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    uncalled_goes_to_calls = { CallStatus::Uncalled, Some(QueueKind::Calls) },
    running_goes_to_running = { CallStatus::Running, Some(QueueKind::Running) },
    returned_goes_to_returns = { CallStatus::Returned, Some(QueueKind::Returns) },
    called_never_queued = { CallStatus::Called, None },
    cancelled_never_queued = { CallStatus::Cancelled, None },
    timeout_never_queued = { CallStatus::Timeout, None },
)]
fn status_to_queue_mapping(status: CallStatus, expected: Option<QueueKind>) {
    assert_eq!(QueueKind::for_status(status), expected);
}

#[test]
fn queue_file_names_are_distinct() {
    let names = [
        QueueKind::Calls.file_name(),
        QueueKind::Running.file_name(),
        QueueKind::Returns.file_name(),
    ];
    assert_eq!(names, ["calls.q", "running.q", "returns.q"]);
}

#[test]
fn envelope_serde_round_trip() {
    let env = Envelope {
        call_id: CallId(7),
        status: CallStatus::Running,
        microtime: 123_456,
        sender_pid: 4321,
    };
    let json = serde_json::to_string(&env).unwrap();
    let back: Envelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back, env);
}

#[test]
fn envelope_json_is_one_flat_object() {
    let env = Envelope {
        call_id: CallId(2),
        status: CallStatus::Uncalled,
        microtime: 1,
        sender_pid: 1,
    };
    let json = serde_json::to_string(&env).unwrap();
    assert!(json.contains("\"status\":\"uncalled\""));
    assert!(json.contains("\"call_id\":2"));
}
