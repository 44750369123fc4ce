// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trivial call round-trip: `square(3)` returns 9 exactly once, walking
//! the full status ladder.

use crate::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use stoker_core::CallStatus;
use tempfile::TempDir;

#[tokio::test]
async fn square_of_three_returns_nine_exactly_once() {
    let dir = TempDir::new().unwrap();
    let (mut pool, mut manager) = square_pool(dir.path(), |c| c.timeout(std::time::Duration::from_secs(5)));

    let returns = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&returns);
    pool.on_return(move |call: &stoker_core::Call| {
        sink.lock().unwrap().push(call.result.clone());
    });

    let id = pool
        .call(&mut manager, "square", json!({"x": 3}), SECOND)
        .unwrap();
    assert_eq!(pool.status(id), Some(CallStatus::Called));

    // Worker picks the job up, acks, executes, writes back
    let mut worker = worker_side(dir.path());
    let job = ack_running(&mut worker, 2 * SECOND);
    let result = json!(job.args.as_ref().unwrap()["x"].as_i64().unwrap().pow(2));
    ack_return(&mut worker, job, result, 3 * SECOND);

    // Two supervisor ticks consume the acks
    pool.pre_execute(&mut manager, Instant::now(), 2 * SECOND + 1)
        .await
        .unwrap();
    pool.pre_execute(&mut manager, Instant::now(), 3 * SECOND + 1)
        .await
        .unwrap();

    // on_return fired exactly once, with 9
    assert_eq!(returns.lock().unwrap().as_slice(), &[Some(json!(9))]);
    assert_eq!(pool.status(id), Some(CallStatus::Returned));

    // Status ladder 0 -> 1 -> 2 -> 3 with non-decreasing times
    let record = pool.call_record(id).unwrap();
    let times = &record.times;
    assert!(times.uncalled.unwrap() <= times.called.unwrap());
    assert!(times.called.unwrap() <= times.running.unwrap());
    assert!(times.running.unwrap() <= times.returned.unwrap());

    // Nothing further arrives on later ticks
    pool.pre_execute(&mut manager, Instant::now(), 4 * SECOND)
        .await
        .unwrap();
    assert_eq!(returns.lock().unwrap().len(), 1);
}
