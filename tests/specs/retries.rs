// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry-on-timeout: a job that never returns is re-queued three times,
//! then cancelled for good on the fourth timeout.

use crate::prelude::*;
use serde_json::json;
use std::time::{Duration, Instant};
use stoker_core::{CallStatus, MAX_RETRIES};
use stoker_daemon::TimeoutAction;
use tempfile::TempDir;

#[tokio::test]
async fn fourth_timeout_cancels_instead_of_retrying() {
    let dir = TempDir::new().unwrap();
    let (mut pool, mut manager) =
        square_pool(dir.path(), |c| c.timeout(Duration::from_secs(2)));
    pool.on_timeout(|_| TimeoutAction::Retry);

    let id = pool
        .call(&mut manager, "square", json!({"x": 1}), SECOND)
        .unwrap();

    let mut worker = worker_side(dir.path());
    let mut now = 2 * SECOND;

    // Attempts 1..=3: the worker acks but never returns; every timeout
    // re-queues the call with one more retry on the counter.
    for attempt in 1..=MAX_RETRIES {
        let _job = ack_running(&mut worker, now);
        pool.pre_execute(&mut manager, Instant::now(), now + 3 * SECOND)
            .await
            .unwrap();
        assert_eq!(
            pool.status(id),
            Some(CallStatus::Called),
            "attempt {attempt} should be re-queued"
        );
        assert_eq!(pool.call_record(id).unwrap().retries, attempt);
        now += 4 * SECOND;
    }

    // Fourth timeout: retries exhausted, no further retry is issued
    let _job = ack_running(&mut worker, now);
    pool.pre_execute(&mut manager, Instant::now(), now + 3 * SECOND)
        .await
        .unwrap();

    let record = pool.call_record(id).unwrap();
    assert_eq!(record.status, CallStatus::Cancelled);
    assert_eq!(record.retries, MAX_RETRIES, "retry ceiling holds");

    // The cancelled call never comes back
    pool.pre_execute(&mut manager, Instant::now(), now + 9 * SECOND)
        .await
        .unwrap();
    assert_eq!(pool.status(id), Some(CallStatus::Cancelled));
}
