// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: a supervisor killed with work in flight re-attaches
//! with `recover`, finds the stored calls, resumes its id counter past
//! them, and dispatches them again.

use crate::prelude::*;
use serde_json::json;
use std::time::Instant;
use stoker_core::{CallId, CallStatus};
use tempfile::TempDir;

#[tokio::test]
async fn recover_attach_rehydrates_and_resumes_ids() {
    let dir = TempDir::new().unwrap();

    // First life: three calls queued, then the supervisor "dies" without
    // any teardown (the SIGKILL case — resources stay on disk).
    let ids: Vec<CallId> = {
        let (mut pool, mut manager) = square_pool(dir.path(), |c| c);
        (1..=3)
            .map(|n| {
                pool.call(&mut manager, "square", json!({"x": n}), SECOND)
                    .unwrap()
            })
            .collect()
    };

    // Second life: recover mode
    let (mut pool, mut manager) = square_pool(dir.path(), |c| c.recover(true));

    // All three records were found and re-dispatched
    for id in &ids {
        assert_eq!(pool.status(*id), Some(CallStatus::Called));
        assert_eq!(pool.call_record(*id).unwrap().retries, 1);
    }
    assert_eq!(pool.transport_state().unwrap().pending_messages, 3);

    // The id counter resumed past the maximum observed id
    let max_seen = ids.iter().max().unwrap();
    let fresh = pool
        .call(&mut manager, "square", json!({"x": 9}), 2 * SECOND)
        .unwrap();
    assert!(fresh > *max_seen);

    // The re-dispatched work still completes normally
    let mut worker = worker_side(dir.path());
    let job = ack_running(&mut worker, 3 * SECOND);
    ack_return(&mut worker, job, json!(1), 4 * SECOND);
    pool.pre_execute(&mut manager, Instant::now(), 4 * SECOND + 1)
        .await
        .unwrap();
    assert_eq!(pool.status(ids[0]), Some(CallStatus::Returned));
}

#[tokio::test]
async fn plain_attach_starts_clean() {
    let dir = TempDir::new().unwrap();
    {
        let (mut pool, mut manager) = square_pool(dir.path(), |c| c);
        pool.call(&mut manager, "square", json!({"x": 1}), SECOND)
            .unwrap();
    }

    // No recover flag: leftovers are purged on attach
    let (pool, _manager) = square_pool(dir.path(), |c| c);
    let state = pool.transport_state().unwrap();
    assert_eq!(state.pending_messages, 0);
    assert_eq!(state.used_bytes, 0);
}
