// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the scenario specs.

use serde_json::json;
use std::path::Path;
use std::time::Duration;
use stoker_core::{Call, CallStatus};
use stoker_daemon::{method_fn, PoolConfig, ProcessManager, WorkerPool};
use stoker_transport::{pool_dir, Role, Transport};

pub const SECOND: u64 = 1_000_000;

/// A manager whose "workers" are plain sleepers; the worker side of the
/// protocol is driven explicitly through a joined transport endpoint.
pub fn manager_with_sleepers() -> ProcessManager {
    let mut manager = ProcessManager::new();
    manager.set_worker_launcher(|_| {
        let mut command = tokio::process::Command::new("sleep");
        command.arg("60");
        command
    });
    manager
}

/// A pool exposing `square(x)`, attached Lazy under `dir`.
pub fn square_pool(
    dir: &Path,
    tweak: impl FnOnce(PoolConfig) -> PoolConfig,
) -> (WorkerPool, ProcessManager) {
    let config = tweak(PoolConfig::new("calc").runtime_dir(dir));
    let mut pool = WorkerPool::new(config);
    pool.register(
        "square",
        method_fn(|args| Ok(json!(args["x"].as_i64().unwrap_or(0).pow(2)))),
    );
    let mut manager = manager_with_sleepers();
    pool.setup(Duration::from_secs(3), &mut manager, SECOND)
        .unwrap();
    (pool, manager)
}

/// Worker-side endpoint on the pool's resources.
pub fn worker_side(dir: &Path) -> Transport {
    Transport::join(&pool_dir(dir, "calc"), "calc", Role::Worker).unwrap()
}

/// Worker-side consume + running ack; returns the job.
pub fn ack_running(worker: &mut Transport, now: u64) -> Call {
    let mut job = worker.next_job(now).unwrap().unwrap();
    assert_ne!(job.status, CallStatus::Cancelled, "unexpected supersede");
    job.worker_pid = Some(std::process::id());
    job.transition(CallStatus::Running, now).unwrap();
    worker.put(&mut job).unwrap();
    job
}

/// Worker-side completion + return ack.
pub fn ack_return(worker: &mut Transport, mut job: Call, result: serde_json::Value, now: u64) {
    job.result = Some(result);
    job.transition(CallStatus::Returned, now).unwrap();
    worker.put(&mut job).unwrap();
}
