// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool mediator.
//!
//! One mediator per named pool. It owns the transport endpoint, a local
//! call registry and the set of in-flight calls; it implements the call
//! protocol on the supervisor side: publish, drain acks, enforce timeouts,
//! detect dropped calls, collect garbage, and keep the pool populated per
//! its forking strategy.

use crate::methods::{MethodRegistry, WorkerMethod, EXECUTE_METHOD};
use crate::process::{ProcessError, ProcessManager};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stoker_core::{Call, CallError, CallId, CallStatus, FIRST_CALL_ID};
use stoker_transport::{
    default_runtime_dir, pool_dir, Role, Transport, TransportError, TransportState,
    RUNTIME_DIR_ENV,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How often the supervisor-side GC pass runs.
pub const GC_INTERVAL: Duration = Duration::from_secs(30);

/// Ceiling on a worker's graceful-stop deadline.
const STOP_DEADLINE_CEILING: Duration = Duration::from_secs(60);

/// How a pool acquires its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkStrategy {
    /// Fork only when every existing worker is occupied.
    Lazy,
    /// Defer forking to the first call, then keep the pool full.
    Mixed,
    /// Fork the full complement up front.
    Eager,
}

impl ForkStrategy {
    /// Strategy for a supervisor ticking at `loop_interval`.
    ///
    /// A zero interval is the busy-loop case and forks eagerly.
    pub fn for_interval(loop_interval: Duration) -> Self {
        if loop_interval <= Duration::from_secs(1) {
            ForkStrategy::Eager
        } else if loop_interval <= Duration::from_secs(2) {
            ForkStrategy::Mixed
        } else {
            ForkStrategy::Lazy
        }
    }
}

stoker_core::simple_display! {
    ForkStrategy {
        Lazy => "lazy",
        Mixed => "mixed",
        Eager => "eager",
    }
}

/// What a timeout callback wants done with the timed-out call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Leave the call timed out.
    GiveUp,
    /// Re-queue the call (bounded by the retry ceiling).
    Retry,
}

/// Errors surfaced by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool configuration: {0}")]
    Config(String),

    #[error("unknown method '{method}' on pool '{alias}'")]
    UnknownMethod { alias: String, method: String },

    #[error("unknown call {0}")]
    UnknownCall(CallId),

    #[error("pool '{0}' is not attached")]
    NotAttached(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Pool sizing and placement, set before the pool is attached.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub alias: String,
    pub max_workers: usize,
    pub timeout: Duration,
    pub allocated_bytes: u64,
    pub recover: bool,
    pub runtime_dir: Option<PathBuf>,
    /// Cadence of the supervisor-side GC pass.
    pub gc_interval: Duration,
}

impl PoolConfig {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            max_workers: 1,
            timeout: Duration::from_secs(30),
            allocated_bytes: 1024 * 1024,
            recover: false,
            runtime_dir: None,
            gc_interval: GC_INTERVAL,
        }
    }

    stoker_core::setters! {
        set {
            max_workers: usize,
            timeout: Duration,
            allocated_bytes: u64,
            recover: bool,
            gc_interval: Duration,
        }
        option {
            runtime_dir: PathBuf,
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.alias.is_empty() {
            problems.push("pool alias must not be empty".to_string());
        }
        if self.max_workers == 0 {
            problems.push(format!("pool '{}': max_workers must be positive", self.alias));
        }
        if self.timeout.is_zero() {
            problems.push(format!("pool '{}': timeout must be positive", self.alias));
        }
        if self.allocated_bytes == 0 {
            problems.push(format!(
                "pool '{}': allocated_bytes must be positive",
                self.alias
            ));
        }
        problems
    }
}

type ReturnCallback = Box<dyn FnMut(&Call) + Send>;
type TimeoutCallback = Box<dyn FnMut(&Call) -> TimeoutAction + Send>;

/// Supervisor-side mediator for one named worker pool.
pub struct WorkerPool {
    config: PoolConfig,
    methods: MethodRegistry,
    transport: Option<Transport>,
    strategy: ForkStrategy,
    base_dir: PathBuf,
    calls: HashMap<CallId, Call>,
    running: HashSet<CallId>,
    next_id: u64,
    ever_called: bool,
    last_gc: Option<Instant>,
    on_return: Option<ReturnCallback>,
    on_timeout: Option<TimeoutCallback>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            methods: MethodRegistry::new(),
            transport: None,
            strategy: ForkStrategy::Lazy,
            base_dir: PathBuf::new(),
            calls: HashMap::new(),
            running: HashSet::new(),
            next_id: FIRST_CALL_ID,
            ever_called: false,
            last_gc: None,
            on_return: None,
            on_timeout: None,
        }
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn strategy(&self) -> ForkStrategy {
        self.strategy
    }

    /// Expose a callable method under `name`.
    pub fn register(&mut self, name: impl Into<String>, method: Arc<dyn WorkerMethod>) {
        self.methods.register(name, method);
    }

    /// Registry clone for the worker runtime.
    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    /// Callback fired once per consumed return ack.
    pub fn on_return(&mut self, callback: impl FnMut(&Call) + Send + 'static) {
        self.on_return = Some(Box::new(callback));
    }

    /// Callback fired once per enforced timeout; decides retry vs give up.
    pub fn on_timeout(&mut self, callback: impl FnMut(&Call) -> TimeoutAction + Send + 'static) {
        self.on_timeout = Some(Box::new(callback));
    }

    /// Problems that make attaching pointless.
    pub fn check_environment(&self) -> Vec<String> {
        let mut problems = self.config.validate();
        if self.methods.is_empty() {
            problems.push(format!(
                "pool '{}' exposes no methods",
                self.config.alias
            ));
        }
        problems
    }

    /// Attach transport and seed the pool.
    ///
    /// Selects the forking strategy from the supervisor's loop interval,
    /// attaches (or recovers) the transport, rehydrates recovered calls,
    /// and eagerly forks when the strategy says so.
    pub fn setup(
        &mut self,
        loop_interval: Duration,
        manager: &mut ProcessManager,
        now_micros: u64,
    ) -> Result<(), PoolError> {
        let problems = self.check_environment();
        if let Some(first) = problems.into_iter().next() {
            return Err(PoolError::Config(first));
        }

        self.strategy = ForkStrategy::for_interval(loop_interval);
        self.base_dir = self
            .config
            .runtime_dir
            .clone()
            .unwrap_or_else(default_runtime_dir);
        let dir = pool_dir(&self.base_dir, &self.config.alias);

        let (transport, recovered) = Transport::attach(
            &dir,
            &self.config.alias,
            self.config.allocated_bytes,
            Role::Supervisor,
            self.config.recover,
        )?;
        self.transport = Some(transport);

        info!(
            alias = %self.config.alias,
            strategy = %self.strategy,
            workers = self.config.max_workers,
            dir = %dir.display(),
            "pool attached"
        );

        self.rehydrate(recovered, now_micros)?;

        if self.strategy == ForkStrategy::Eager {
            self.top_up(manager)?;
        }
        Ok(())
    }

    /// Restore recovered calls: resume the id counter past the maximum
    /// observed id and re-dispatch everything still active as a retry.
    fn rehydrate(&mut self, recovered: Vec<Call>, now_micros: u64) -> Result<(), PoolError> {
        for mut call in recovered {
            self.next_id = self.next_id.max(call.id.as_u64() + 1);
            if call.is_active() {
                match call.retry(now_micros) {
                    Ok(_) => {
                        self.publish(&mut call, now_micros)?;
                        info!(alias = %self.config.alias, call = %call.id, "recovered call re-queued");
                    }
                    Err(_) => {
                        give_up(&mut call, now_micros);
                        warn!(alias = %self.config.alias, call = %call.id, "recovered call out of retries, cancelled");
                    }
                }
            }
            self.calls.insert(call.id, call);
        }
        Ok(())
    }

    /// Queue an invocation of `method`. Returns the new call id.
    ///
    /// Fails before any IPC when the method is unknown. On transport
    /// failure the call is abandoned: its args are dropped to free memory,
    /// the record is kept as cancelled, and the error is returned.
    pub fn call(
        &mut self,
        manager: &mut ProcessManager,
        method: &str,
        args: Value,
        now_micros: u64,
    ) -> Result<CallId, PoolError> {
        if !self.methods.contains(method) {
            return Err(PoolError::UnknownMethod {
                alias: self.config.alias.clone(),
                method: method.to_string(),
            });
        }

        let id = CallId(self.next_id);
        self.next_id += 1;
        let mut call = Call::new(id, method, args, now_micros);

        match self.publish(&mut call, now_micros) {
            Ok(()) => {
                self.ever_called = true;
                self.calls.insert(id, call);
                self.fork_for_new_call(manager)?;
                Ok(id)
            }
            Err(e) => {
                call.args = None;
                give_up(&mut call, now_micros);
                self.calls.insert(id, call);
                error!(alias = %self.config.alias, call = %id, error = %e, "call abandoned, transport failed");
                Err(e)
            }
        }
    }

    /// The call sugar: `pool.invoke(args)` queues the `execute` method.
    pub fn invoke(
        &mut self,
        manager: &mut ProcessManager,
        args: Value,
        now_micros: u64,
    ) -> Result<CallId, PoolError> {
        self.call(manager, EXECUTE_METHOD, args, now_micros)
    }

    /// Re-queue a prior call, preserving its identity.
    pub fn retry(
        &mut self,
        manager: &mut ProcessManager,
        id: CallId,
        now_micros: u64,
    ) -> Result<u32, PoolError> {
        let call = self.calls.get_mut(&id).ok_or(PoolError::UnknownCall(id))?;
        let attempt = call.retry(now_micros)?;
        let mut requeued = call.clone();
        self.running.remove(&id);
        self.publish(&mut requeued, now_micros)?;
        self.calls.insert(id, requeued);
        self.fork_for_new_call(manager)?;
        Ok(attempt)
    }

    pub fn status(&self, id: CallId) -> Option<CallStatus> {
        self.calls.get(&id).map(|c| c.status)
    }

    pub fn call_record(&self, id: CallId) -> Option<&Call> {
        self.calls.get(&id)
    }

    /// A pool is idle while it has worker capacity left.
    pub fn is_idle(&self) -> bool {
        self.config.max_workers > self.running.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Transport health for stats dumps.
    pub fn transport_state(&self) -> Result<TransportState, PoolError> {
        self.transport
            .as_ref()
            .ok_or_else(|| PoolError::NotAttached(self.config.alias.clone()))?
            .state()
            .map_err(PoolError::from)
    }

    /// Per-tick supervisor duties, in protocol order: drain running acks,
    /// drain returns, enforce timeouts, maintain the pool, run GC.
    pub async fn pre_execute(
        &mut self,
        manager: &mut ProcessManager,
        now: Instant,
        now_micros: u64,
    ) -> Result<(), PoolError> {
        self.drain_running_acks(manager)?;
        self.drain_returns(manager)?;
        self.enforce_timeouts(manager, now_micros).await?;
        self.maintain(manager)?;
        self.collect_garbage(now, now_micros)?;
        Ok(())
    }

    fn drain_running_acks(&mut self, manager: &mut ProcessManager) -> Result<(), PoolError> {
        loop {
            let ack = match self.transport()?.next_running_ack() {
                Ok(Some(ack)) => ack,
                Ok(None) => return Ok(()),
                Err(e) => return self.absorb(e),
            };
            let Some(call) = self.calls.get_mut(&ack.call_id) else {
                debug!(alias = %self.config.alias, call = %ack.call_id, "running ack for unknown call");
                continue;
            };
            if call.transition(CallStatus::Running, ack.microtime).is_err() {
                debug!(alias = %self.config.alias, call = %ack.call_id, status = %call.status, "stale running ack");
                continue;
            }
            call.worker_pid = Some(ack.sender_pid);
            self.running.insert(ack.call_id);
            manager.set_current_call(ack.sender_pid, Some(ack.call_id));
        }
    }

    fn drain_returns(&mut self, manager: &mut ProcessManager) -> Result<(), PoolError> {
        loop {
            let stored = match self.transport()?.next_return() {
                Ok(Some(call)) => call,
                Ok(None) => return Ok(()),
                Err(e) => return self.absorb(e),
            };
            let id = stored.id;
            self.running.remove(&id);
            if let Some(pid) = stored.worker_pid {
                manager.set_current_call(pid, None);
            }

            let returned_at = stored.times.returned.unwrap_or(now_fallback(&stored));
            let entry = self.calls.entry(id).or_insert_with(|| stored.clone());
            entry.result = stored.result.clone();
            entry.size = stored.size;
            entry.worker_pid = stored.worker_pid.or(entry.worker_pid);
            if entry.times.running.is_none() {
                entry.times.running = stored.times.running;
            }
            if entry.transition(CallStatus::Returned, returned_at).is_err() {
                // Usually a late return from a call we already timed out
                debug!(alias = %self.config.alias, call = %id, status = %entry.status, "late return dropped");
                continue;
            }
            debug!(alias = %self.config.alias, call = %id, "call returned");
            if let Some(callback) = self.on_return.as_mut() {
                callback(entry);
            }
        }
    }

    async fn enforce_timeouts(
        &mut self,
        manager: &mut ProcessManager,
        now_micros: u64,
    ) -> Result<(), PoolError> {
        let budget = self.config.timeout.as_micros() as u64;
        let expired: Vec<CallId> = self
            .running
            .iter()
            .filter(|id| {
                self.calls
                    .get(id)
                    .and_then(|c| c.times.running)
                    .map(|started| now_micros.saturating_sub(started) > budget)
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        for id in expired {
            self.running.remove(&id);
            let Some(call) = self.calls.get_mut(&id) else {
                continue;
            };
            let pid = call.worker_pid;
            call.transition(CallStatus::Timeout, now_micros)?;
            warn!(
                alias = %self.config.alias,
                call = %id,
                worker = ?pid,
                retries = call.retries,
                "call timed out"
            );

            if let Some(pid) = pid {
                if manager.contains(pid) {
                    manager.kill(pid).await?;
                }
            }

            let snapshot = call.clone();
            let action = match self.on_timeout.as_mut() {
                Some(callback) => callback(&snapshot),
                None => TimeoutAction::GiveUp,
            };
            if action == TimeoutAction::Retry {
                match self.retry(manager, id, now_micros) {
                    Ok(attempt) => {
                        info!(alias = %self.config.alias, call = %id, attempt, "timed-out call re-queued");
                    }
                    Err(PoolError::Call(CallError::RetriesExhausted { .. })) => {
                        if let Some(call) = self.calls.get_mut(&id) {
                            give_up(call, now_micros);
                        }
                        error!(alias = %self.config.alias, call = %id, "retries exhausted, call cancelled");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Keep the pool populated per strategy, and never leave published work
    /// without any worker to consume it.
    fn maintain(&mut self, manager: &mut ProcessManager) -> Result<(), PoolError> {
        match self.strategy {
            ForkStrategy::Eager => self.top_up(manager)?,
            ForkStrategy::Mixed if self.ever_called => self.top_up(manager)?,
            _ => {
                if manager.count(Some(&self.config.alias)) == 0 {
                    let pending = self.transport()?.state()?.pending_messages;
                    if pending > 0 {
                        info!(alias = %self.config.alias, pending, "no workers left, forking replacement");
                        self.spawn_one(manager)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Supervisor-side garbage collection, every [`GC_INTERVAL`].
    ///
    /// Clears heavy fields of inactive calls, releases their store slots,
    /// and re-queues dropped calls: anything still `Called` that predates
    /// the oldest call a worker has acked was never consumed.
    fn collect_garbage(&mut self, now: Instant, now_micros: u64) -> Result<(), PoolError> {
        let due = self
            .last_gc
            .map(|last| now.duration_since(last) >= self.config.gc_interval)
            .unwrap_or(true);
        if !due {
            return Ok(());
        }
        self.last_gc = Some(now);

        let mut collected = 0u32;
        for call in self.calls.values_mut() {
            if !call.is_active() && !call.collected && call.gc().is_ok() {
                collected += 1;
            }
        }
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| PoolError::NotAttached(self.config.alias.clone()))?;
        let released = transport.gc(self.calls.values())?;
        if collected > 0 || released > 0 {
            debug!(alias = %self.config.alias, collected, released, "gc pass");
        }

        let baseline = self
            .running
            .iter()
            .filter_map(|id| self.calls.get(id).and_then(|c| c.times.called))
            .min();
        if let Some(baseline) = baseline {
            let dropped: Vec<CallId> = self
                .calls
                .values()
                .filter(|c| {
                    c.status == CallStatus::Called
                        && c.times.called.map(|t| t < baseline).unwrap_or(false)
                })
                .map(|c| c.id)
                .collect();
            for id in dropped {
                warn!(alias = %self.config.alias, call = %id, "dropped call detected, re-queuing");
                let Some(call) = self.calls.get_mut(&id) else {
                    continue;
                };
                match call.retry(now_micros) {
                    Ok(_) => {
                        let mut requeued = call.clone();
                        self.publish(&mut requeued, now_micros)?;
                        self.calls.insert(id, requeued);
                    }
                    Err(_) => {
                        give_up(call, now_micros);
                        error!(alias = %self.config.alias, call = %id, "dropped call out of retries, cancelled");
                    }
                }
            }
        }
        Ok(())
    }

    /// Publish an `Uncalled` call and move it to `Called` on success.
    fn publish(&mut self, call: &mut Call, now_micros: u64) -> Result<(), PoolError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| PoolError::NotAttached(self.config.alias.clone()))?;
        transport.put(call)?;
        call.transition(CallStatus::Called, now_micros)?;
        Ok(())
    }

    /// Fork reaction to a freshly queued call, per strategy.
    fn fork_for_new_call(&mut self, manager: &mut ProcessManager) -> Result<(), PoolError> {
        match self.strategy {
            ForkStrategy::Eager => Ok(()),
            ForkStrategy::Mixed => self.top_up(manager),
            ForkStrategy::Lazy => {
                let count = manager.count(Some(&self.config.alias));
                if count == 0
                    || (self.running.len() >= count && count < self.config.max_workers)
                {
                    self.spawn_one(manager)?;
                }
                Ok(())
            }
        }
    }

    fn top_up(&mut self, manager: &mut ProcessManager) -> Result<(), PoolError> {
        while manager.count(Some(&self.config.alias)) < self.config.max_workers {
            self.spawn_one(manager)?;
        }
        Ok(())
    }

    fn spawn_one(&mut self, manager: &mut ProcessManager) -> Result<u32, PoolError> {
        let envs = vec![(
            RUNTIME_DIR_ENV.to_string(),
            self.base_dir.to_string_lossy().into_owned(),
        )];
        let deadline = self.config.timeout.min(STOP_DEADLINE_CEILING);
        let pid = manager.spawn_worker(&self.config.alias, &envs, deadline)?;
        Ok(pid)
    }

    /// Fold daemon-level placement defaults into the pool config; explicit
    /// pool settings win. Called before setup.
    pub(crate) fn inherit(&mut self, recover: bool, runtime_dir: Option<&PathBuf>) {
        self.config.recover = self.config.recover || recover;
        if self.config.runtime_dir.is_none() {
            self.config.runtime_dir = runtime_dir.cloned();
        }
    }

    /// Corruption recovery: rebuild the transport resources and mirror the
    /// re-queued retries in the local registry.
    pub fn rebuild(&mut self, now_micros: u64) -> Result<(), PoolError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| PoolError::NotAttached(self.config.alias.clone()))?;
        let requeued = transport.rebuild(now_micros)?;
        for id in requeued {
            self.running.remove(&id);
            if let Some(call) = self.calls.get_mut(&id) {
                match call.retry(now_micros) {
                    Ok(_) => {
                        let _ = call.transition(CallStatus::Called, now_micros);
                    }
                    Err(_) => give_up(call, now_micros),
                }
            }
        }
        Ok(())
    }

    /// Clean-shutdown teardown: in-flight state is not persisted, the pool
    /// resources are destroyed.
    pub fn teardown(&mut self) {
        if let Some(transport) = self.transport.as_ref() {
            if let Err(e) = transport.purge() {
                warn!(alias = %self.config.alias, error = %e, "purge failed during teardown");
            }
        }
        self.transport = None;
    }

    /// Route a transport error through the endpoint budget; within budget
    /// it is logged and swallowed, beyond it it propagates as fatal.
    fn absorb(&mut self, error: TransportError) -> Result<(), PoolError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| PoolError::NotAttached(self.config.alias.clone()))?;
        if transport.absorb(&error) {
            warn!(alias = %self.config.alias, error = %error, "transport fault absorbed");
            Ok(())
        } else {
            Err(PoolError::Transport(error))
        }
    }

    fn transport(&mut self) -> Result<&mut Transport, PoolError> {
        self.transport
            .as_mut()
            .ok_or_else(|| PoolError::NotAttached(self.config.alias.clone()))
    }
}

/// Terminal give-up: the legal route to `Cancelled` from any status is the
/// reset to `Uncalled` followed by the forward move.
fn give_up(call: &mut Call, now_micros: u64) {
    let _ = call.transition(CallStatus::Uncalled, now_micros);
    let _ = call.transition(CallStatus::Cancelled, now_micros);
}

/// Latest known timestamp on a call, for returns missing their slot.
fn now_fallback(call: &Call) -> u64 {
    call.microtime()
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
