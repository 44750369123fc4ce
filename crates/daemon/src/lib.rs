// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! stoker-daemon: supervised event-loop host with persistent worker pools.
//!
//! The [`Daemon`] runs a periodic supervisor loop that schedules user work,
//! spawns and supervises pools of worker processes, and mediates typed
//! call/return traffic with timeouts, retries and at-most-once semantics.
//! The same executable doubles as the worker: when spawned with the pool
//! environment marker set, [`Daemon::run`] routes into the worker runtime
//! instead of the supervisor.

pub mod daemon;
pub mod event_bus;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod methods;
pub mod options;
pub mod plugin;
pub mod pool;
pub mod process;
pub mod worker;

pub use daemon::{App, Daemon, DaemonConfig, DaemonError, Supervisor};
pub use event_bus::{CallbackHandle, EventBus};
pub use lock::{FileLock, Lock, NullLock};
pub use methods::{method_fn, MethodError, MethodRegistry, WorkerMethod, EXECUTE_METHOD};
pub use options::DaemonOptions;
pub use plugin::{Plugin, PluginError};
pub use pool::{ForkStrategy, PoolConfig, PoolError, TimeoutAction, WorkerPool};
pub use process::{Process, ProcessError, ProcessManager, Reaped, WORKER_POOL_ENV};
pub use worker::{WorkerError, WorkerRuntime};
