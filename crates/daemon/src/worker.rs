// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-process runtime.
//!
//! A worker joins its pool's transport, then loops: take a job from the
//! inbox, ack it running, invoke the method, write the return back. Method
//! failures and panics produce no return ack — the supervisor observes the
//! timeout, which is the contract. Workers recycle themselves on a jittered
//! schedule so a pool never restarts in lockstep.

use crate::methods::MethodRegistry;
use rand::Rng;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use stoker_core::{Call, CallStatus, Clock, SystemClock};
use stoker_transport::{default_runtime_dir, pool_dir, Role, Transport, TransportError};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

/// Sleep between loop iterations when the inbox is empty.
const ITERATION_SLEEP: Duration = Duration::from_millis(50);

/// Share of iterations that run the housekeeping sweep.
const GC_SHARE: f64 = 0.2;

/// Recycle after roughly this much total runtime.
const RUNTIME_LIMIT: Duration = Duration::from_secs(30 * 60);

/// Jitter spread applied to the runtime limit.
const RUNTIME_JITTER: Duration = Duration::from_secs(3 * 60);

/// Runtime floor before the call-count recycle applies.
const CALL_RECYCLE_FLOOR: Duration = Duration::from_secs(5 * 60);

/// Recycle after roughly this many handled calls (past the floor).
const CALL_RECYCLE_COUNT: u32 = 25;

/// Errors that end a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One worker process's side of the pool protocol.
pub struct WorkerRuntime {
    alias: String,
    methods: MethodRegistry,
    transport: Transport,
    clock: SystemClock,
    started: Instant,
    handled: u32,
    runtime_limit: Duration,
    recycle_floor: Duration,
    recycle_calls: u32,
}

impl WorkerRuntime {
    /// Join the pool `alias`, resolving the directory the same way the
    /// supervisor did (env override, then default).
    pub fn join(
        alias: &str,
        methods: MethodRegistry,
        runtime_dir: Option<PathBuf>,
    ) -> Result<Self, WorkerError> {
        let base = runtime_dir.unwrap_or_else(default_runtime_dir);
        let dir = pool_dir(&base, alias);
        let transport = Transport::join(&dir, alias, Role::Worker)?;

        Ok(Self {
            alias: alias.to_string(),
            methods,
            transport,
            clock: SystemClock,
            started: Instant::now(),
            handled: 0,
            runtime_limit: jittered(RUNTIME_LIMIT, RUNTIME_JITTER),
            recycle_floor: CALL_RECYCLE_FLOOR,
            recycle_calls: CALL_RECYCLE_COUNT + rand::rng().random_range(0..10),
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn handled(&self) -> u32 {
        self.handled
    }

    /// Main loop: run until told to stop or due for recycling.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        info!(alias = %self.alias, pid = std::process::id(), "worker online");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!(alias = %self.alias, "worker stopping on SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    info!(alias = %self.alias, "worker stopping on SIGINT");
                    break;
                }
                job = self.take_job() => {
                    if let Some(call) = job? {
                        self.execute(call)?;
                    }
                }
            }

            if rand::rng().random::<f64>() < GC_SHARE {
                if let Ok(cleared) = self.transport.sweep() {
                    if cleared > 0 {
                        debug!(alias = %self.alias, cleared, "swept stale temp files");
                    }
                }
            }

            if self.due_for_recycle() {
                info!(
                    alias = %self.alias,
                    handled = self.handled,
                    uptime_secs = self.started.elapsed().as_secs(),
                    "worker recycling"
                );
                break;
            }
        }
        Ok(())
    }

    /// One inbox poll; sleeps the iteration delay when the inbox is empty
    /// so the loop yields the CPU between jobs.
    async fn take_job(&mut self) -> Result<Option<Call>, WorkerError> {
        match self.transport.next_job(self.clock.micros()) {
            Ok(Some(call)) if call.status == CallStatus::Cancelled => {
                debug!(alias = %self.alias, call = %call.id, "superseded call discarded");
                Ok(None)
            }
            Ok(Some(call)) => Ok(Some(call)),
            Ok(None) => {
                tokio::time::sleep(ITERATION_SLEEP).await;
                Ok(None)
            }
            Err(e) => self.fault(e).map(|_| None),
        }
    }

    /// Run one call: running ack, invoke, return writeback.
    fn execute(&mut self, mut call: Call) -> Result<(), WorkerError> {
        call.worker_pid = Some(std::process::id());
        if let Err(e) = call.transition(CallStatus::Running, self.clock.micros()) {
            debug!(alias = %self.alias, call = %call.id, error = %e, "job not runnable, discarded");
            return Ok(());
        }
        if let Err(e) = self.transport.put(&mut call) {
            return self.fault(e);
        }

        let args = call.args.clone().unwrap_or(Value::Null);
        let method = call.method.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.methods.invoke(&method, args)));

        match outcome {
            Ok(Ok(value)) => {
                call.result = Some(value);
                self.handled += 1;
                if let Err(e) = call.transition(CallStatus::Returned, self.clock.micros()) {
                    debug!(alias = %self.alias, call = %call.id, error = %e, "return transition refused");
                    return Ok(());
                }
                if let Err(e) = self.transport.put(&mut call) {
                    return self.fault(e);
                }
                debug!(alias = %self.alias, call = %call.id, "call completed");
            }
            Ok(Err(e)) => {
                // No return ack: the supervisor will time the call out
                self.handled += 1;
                error!(alias = %self.alias, call = %call.id, error = %e, "method failed");
            }
            Err(_) => {
                error!(alias = %self.alias, call = %call.id, method = %method, "method panicked");
            }
        }
        Ok(())
    }

    fn due_for_recycle(&self) -> bool {
        let uptime = self.started.elapsed();
        uptime >= self.runtime_limit
            || (uptime >= self.recycle_floor && self.handled >= self.recycle_calls)
    }

    /// Absorb a transport error within the worker budget, or end the
    /// worker when the budget is spent.
    fn fault(&mut self, error: TransportError) -> Result<(), WorkerError> {
        if self.transport.absorb(&error) {
            debug!(alias = %self.alias, error = %error, "transport fault absorbed");
            Ok(())
        } else {
            error!(alias = %self.alias, error = %error, "transport budget spent, worker exiting");
            Err(WorkerError::Transport(error))
        }
    }
}

/// `base` plus a roughly normal offset in `[-spread, +spread]` (mean of
/// three uniform draws), used to de-synchronize pool recycles.
fn jittered(base: Duration, spread: Duration) -> Duration {
    let mut rng = rand::rng();
    let unit: f64 =
        (0..3).map(|_| rng.random_range(-1.0f64..=1.0)).sum::<f64>() / 3.0;
    let offset = spread.as_secs_f64() * unit;
    let total = (base.as_secs_f64() + offset).max(1.0);
    Duration::from_secs_f64(total)
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
