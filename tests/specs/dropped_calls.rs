// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dropped-call detection: a published call that no worker ever consumed
//! is inferred from ack ordering and re-queued.

use crate::prelude::*;
use serde_json::json;
use std::time::Instant;
use stoker_core::CallStatus;
use tempfile::TempDir;

#[tokio::test]
async fn unconsumed_older_call_is_requeued_with_one_retry() {
    let dir = TempDir::new().unwrap();
    let (mut pool, mut manager) = square_pool(dir.path(), |c| c.max_workers(2));

    // Call A at t=0; it will be lost before any worker acks it
    let a = pool
        .call(&mut manager, "square", json!({"x": 1}), SECOND)
        .unwrap();
    // Call B at t=1, acked RUNNING by a worker
    let b = pool
        .call(&mut manager, "square", json!({"x": 2}), 2 * SECOND)
        .unwrap();

    let mut worker = worker_side(dir.path());
    // The worker that took A dies before acking: simulate by consuming
    // the envelope and doing nothing with it
    let lost = worker.next_job(3 * SECOND).unwrap().unwrap();
    assert_eq!(lost.id, a);
    let acked = ack_running(&mut worker, 3 * SECOND);
    assert_eq!(acked.id, b);

    // GC compares A's queue time against the oldest in-flight call (B)
    pool.pre_execute(&mut manager, Instant::now(), 3 * SECOND + 1)
        .await
        .unwrap();

    assert_eq!(pool.status(b), Some(CallStatus::Running));
    assert_eq!(pool.status(a), Some(CallStatus::Called), "A was re-queued");
    assert_eq!(pool.call_record(a).unwrap().retries, 1);

    // The re-published copy of A is consumable and intact
    let requeued = worker.next_job(4 * SECOND).unwrap().unwrap();
    assert_eq!(requeued.id, a);
    assert_eq!(requeued.status, CallStatus::Uncalled);
    assert_eq!(requeued.args, Some(json!({"x": 1})));
}
