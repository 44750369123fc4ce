// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: a periodic event loop hosting worker pools, plug-ins
//! and user work.
//!
//! Startup order is construct → check environment → `ON_INIT` (locks
//! acquire here, before any worker exists) → plug-in setup in declared
//! order → pool setup (which may eagerly fork) → user setup → run. The
//! loop ticks at `loop_interval`: reap children, dispatch `ON_RUN`, run
//! each pool's pre-execute duties, run user work, then sleep the residual.

use crate::event_bus::{CallbackHandle, EventBus};
use crate::lifecycle::{self, PidFile};
use crate::lock::Lock;
use crate::options::DaemonOptions;
use crate::plugin::{Plugin, PluginError};
use crate::pool::{PoolError, WorkerPool};
use crate::process::{ProcessError, ProcessManager, WORKER_POOL_ENV};
use crate::worker::{WorkerError, WorkerRuntime};
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use stoker_core::{CallId, CallStatus, Clock, EventKind, EventPayload, LoopStats, SystemClock, TickStat};
use stoker_transport::TransportError;
use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, error, info, warn};

/// A fatal error only triggers a self-restart once the supervisor has been
/// up this long; anything earlier is treated as a startup failure.
const MIN_RESTART_UPTIME: Duration = Duration::from_secs(10);

/// Errors that end the supervisor.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("environment check failed: {}", .0.join("; "))]
    Environment(Vec<String>),

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}

/// Supervisor timing and placement.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub loop_interval: Duration,
    pub auto_restart_interval: Duration,
    pub detach: bool,
    pub recover: bool,
    pub debug_workers: bool,
    pub pid_file: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(1),
            auto_restart_interval: Duration::from_secs(12 * 60 * 60),
            detach: false,
            recover: false,
            debug_workers: false,
            pid_file: None,
            runtime_dir: None,
            log_file: None,
        }
    }
}

impl DaemonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    stoker_core::setters! {
        set {
            loop_interval: Duration,
            auto_restart_interval: Duration,
            detach: bool,
            recover: bool,
            debug_workers: bool,
        }
        option {
            pid_file: PathBuf,
            runtime_dir: PathBuf,
            log_file: PathBuf,
        }
    }

    /// Fold parsed CLI options over this config.
    pub fn apply_options(mut self, options: &DaemonOptions) -> Self {
        self.detach |= options.detach;
        self.recover |= options.recover;
        self.debug_workers |= options.debug_workers;
        if options.pid_file.is_some() {
            self.pid_file = options.pid_file.clone();
        }
        if options.runtime_dir.is_some() {
            self.runtime_dir = options.runtime_dir.clone();
        }
        self
    }
}

/// User application hosted by the daemon.
pub trait App: Send {
    /// Runs once after pools and plug-ins are up.
    fn setup(&mut self, supervisor: &mut Supervisor) -> Result<(), DaemonError> {
        let _ = supervisor;
        Ok(())
    }

    /// Runs every tick.
    fn execute(&mut self, supervisor: &mut Supervisor) -> Result<(), DaemonError>;

    /// Runs once during graceful shutdown.
    fn teardown(&mut self, supervisor: &mut Supervisor) {
        let _ = supervisor;
    }
}

/// The supervisor state handed to user code.
pub struct Supervisor {
    config: DaemonConfig,
    pools: Vec<WorkerPool>,
    manager: ProcessManager,
    bus: EventBus,
    stats: LoopStats,
    clock: SystemClock,
    started: Instant,
    shutdown: bool,
    restart: bool,
}

impl Supervisor {
    fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            pools: Vec::new(),
            manager: ProcessManager::new(),
            bus: EventBus::new(),
            stats: LoopStats::new(),
            clock: SystemClock,
            started: Instant::now(),
            shutdown: false,
            restart: false,
        }
    }

    fn pool_index(&self, alias: &str) -> Option<usize> {
        self.pools.iter().position(|p| p.alias() == alias)
    }

    pub fn pool(&self, alias: &str) -> Option<&WorkerPool> {
        self.pools.iter().find(|p| p.alias() == alias)
    }

    pub fn pool_mut(&mut self, alias: &str) -> Option<&mut WorkerPool> {
        self.pools.iter_mut().find(|p| p.alias() == alias)
    }

    /// Queue a call on the named pool.
    pub fn call(&mut self, alias: &str, method: &str, args: Value) -> Result<CallId, DaemonError> {
        let now_micros = self.clock.micros();
        let index = self
            .pool_index(alias)
            .ok_or_else(|| DaemonError::Config(format!("unknown pool '{alias}'")))?;
        let pool = &mut self.pools[index];
        pool.call(&mut self.manager, method, args, now_micros)
            .map_err(Into::into)
    }

    /// The call sugar: queue the pool's `execute` method.
    pub fn invoke(&mut self, alias: &str, args: Value) -> Result<CallId, DaemonError> {
        self.call(alias, crate::methods::EXECUTE_METHOD, args)
    }

    /// Re-queue a prior call on the named pool.
    pub fn retry(&mut self, alias: &str, id: CallId) -> Result<u32, DaemonError> {
        let now_micros = self.clock.micros();
        let index = self
            .pool_index(alias)
            .ok_or_else(|| DaemonError::Config(format!("unknown pool '{alias}'")))?;
        let pool = &mut self.pools[index];
        pool.retry(&mut self.manager, id, now_micros)
            .map_err(Into::into)
    }

    pub fn status(&self, alias: &str, id: CallId) -> Option<CallStatus> {
        self.pool(alias).and_then(|p| p.status(id))
    }

    /// Register an event callback.
    pub fn on(
        &mut self,
        kind: EventKind,
        callback: impl Fn(&EventPayload) + Send + 'static,
    ) -> CallbackHandle {
        self.bus.on(kind, callback)
    }

    pub fn off(&mut self, handle: CallbackHandle) -> bool {
        self.bus.off(handle)
    }

    pub fn dispatch(&self, kind: EventKind, payload: &EventPayload) -> usize {
        self.bus.dispatch(kind, payload)
    }

    /// Ad-hoc one-shot background task, distinct from persistent workers.
    /// Runs on a blocking thread and just goes away when done.
    pub fn task(&self, name: &str, work: impl FnOnce() + Send + 'static) {
        self.bus.dispatch(
            EventKind::Fork,
            &EventPayload::Fork {
                group: format!("task:{name}"),
                pid: std::process::id(),
            },
        );
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            work();
            debug!(task = %name, "one-shot task finished");
        });
    }

    /// Ask the loop to stop at the next boundary.
    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Ask for a restart at the next boundary (detached runs only).
    pub fn request_restart(&mut self) {
        self.restart = true;
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn manager(&self) -> &ProcessManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ProcessManager {
        &mut self.manager
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn process_count(&self, alias: Option<&str>) -> usize {
        self.manager.count(alias)
    }

    fn dump_stats(&self) {
        let mean = self
            .stats
            .mean_duration(50)
            .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "n/a".to_string());
        let idle = self
            .stats
            .last()
            .map(|s| format!("{:.3}s", s.idle))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            uptime_secs = self.started.elapsed().as_secs(),
            ticks = self.stats.len(),
            mean_tick = %mean,
            last_idle = %idle,
            "runtime stats"
        );
        for pool in &self.pools {
            let transport = pool
                .transport_state()
                .map(|s| {
                    format!(
                        "pending={} used={}B of {}B",
                        s.pending_messages, s.used_bytes, s.allocated_bytes
                    )
                })
                .unwrap_or_else(|e| e.to_string());
            info!(
                pool = pool.alias(),
                running = pool.running_count(),
                workers = self.manager.count(Some(pool.alias())),
                transport = %transport,
                "pool stats"
            );
        }
    }
}

/// How a completed run loop wants the process to end.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Shutdown,
    Restart,
}

/// The daemon host. Construct, add pools, plug-ins and locks, then `run`.
pub struct Daemon<A: App> {
    app: A,
    supervisor: Supervisor,
    plugins: Vec<Box<dyn Plugin>>,
    locks: Vec<Box<dyn Lock>>,
}

impl<A: App> Daemon<A> {
    pub fn new(config: DaemonConfig, app: A) -> Self {
        Self {
            app,
            supervisor: Supervisor::new(config),
            plugins: Vec::new(),
            locks: Vec::new(),
        }
    }

    /// Add a worker pool. Pool aliases must be unique.
    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.supervisor.pools.push(pool);
        self
    }

    pub fn plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn lock(mut self, lock: Box<dyn Lock>) -> Self {
        self.locks.push(lock);
        self
    }

    /// Register an event callback before startup.
    pub fn on(mut self, kind: EventKind, callback: impl Fn(&EventPayload) + Send + 'static) -> Self {
        self.supervisor.bus.on(kind, callback);
        self
    }

    /// Pre-startup access to the supervisor, e.g. to install a custom
    /// worker launcher on the process manager.
    pub fn configure(mut self, f: impl FnOnce(&mut Supervisor)) -> Self {
        f(&mut self.supervisor);
        self
    }

    /// Run as supervisor — or as a worker, when this process carries the
    /// worker pool marker in its environment.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        let _log_guard = crate::logging::init(self.supervisor.config.log_file.as_deref())?;

        if let Ok(alias) = std::env::var(WORKER_POOL_ENV) {
            return self.run_worker(&alias).await;
        }

        if self.supervisor.config.detach && !lifecycle::is_detached_child() {
            let pid = lifecycle::spawn_detached()?;
            info!(pid, "daemon detached, parent exiting");
            return Ok(());
        }
        if lifecycle::is_detached_child() {
            self.supervisor.bus.dispatch(
                EventKind::PidChange,
                &EventPayload::PidChange {
                    old: std::os::unix::process::parent_id(),
                    new: std::process::id(),
                },
            );
        }

        let pid_file = match self.supervisor.config.pid_file.clone() {
            Some(path) => Some(PidFile::write(path)?),
            None => None,
        };

        if self.supervisor.config.debug_workers {
            warn!("--debug-workers requested; the interactive console is not part of this runtime");
        }

        self.init()?;
        info!(
            pid = std::process::id(),
            interval_ms = self.supervisor.config.loop_interval.as_millis() as u64,
            pools = self.supervisor.pools.len(),
            "daemon ready"
        );

        let result = self.run_loop().await;
        match result {
            Ok(Outcome::Shutdown) => {
                self.shutdown_sequence().await;
                if let Some(pid_file) = pid_file {
                    pid_file.remove_if_owner();
                }
                info!("daemon stopped");
                Ok(())
            }
            Ok(Outcome::Restart) => {
                info!("stopping workers before restart");
                self.supervisor.manager.shutdown().await;
                drop(pid_file);
                Err(DaemonError::Io(lifecycle::exec_restart()))
            }
            Err(e) => {
                self.supervisor
                    .bus
                    .dispatch(EventKind::Error, &EventPayload::Error(e.to_string()));
                error!(error = %e, "fatal supervisor error");
                if lifecycle::is_detached_child()
                    && self.supervisor.started.elapsed() >= MIN_RESTART_UPTIME
                {
                    self.supervisor.manager.shutdown().await;
                    drop(pid_file);
                    return Err(DaemonError::Io(lifecycle::exec_restart()));
                }
                self.supervisor.manager.shutdown().await;
                Err(e)
            }
        }
    }

    /// Startup order per the protocol; any environment problem is fatal.
    fn init(&mut self) -> Result<(), DaemonError> {
        let mut problems = Vec::new();
        for plugin in &self.plugins {
            problems.extend(plugin.check_environment());
        }
        for lock in &self.locks {
            problems.extend(lock.check_environment());
        }
        for pool in &self.supervisor.pools {
            problems.extend(pool.check_environment());
        }
        {
            let mut seen = std::collections::HashSet::new();
            for pool in &self.supervisor.pools {
                if !seen.insert(pool.alias().to_string()) {
                    problems.push(format!("duplicate pool alias '{}'", pool.alias()));
                }
            }
        }
        if !problems.is_empty() {
            return Err(DaemonError::Environment(problems));
        }

        // Locks acquire at ON_INIT, before any worker is spawned, so a
        // duplicate instance dies here instead of after forking.
        self.supervisor
            .bus
            .dispatch(EventKind::Init, &EventPayload::None);
        for lock in self.locks.iter_mut() {
            if let Some(owner) = lock.test()? {
                return Err(DaemonError::Fatal(format!(
                    "another instance holds {}: {owner}",
                    lock.name()
                )));
            }
            lock.acquire()?;
        }

        for plugin in self.plugins.iter_mut() {
            plugin.setup()?;
        }

        let loop_interval = self.supervisor.config.loop_interval;
        let recover = self.supervisor.config.recover;
        let runtime_dir = self.supervisor.config.runtime_dir.clone();
        let now_micros = self.supervisor.clock.micros();
        for index in 0..self.supervisor.pools.len() {
            let supervisor = &mut self.supervisor;
            let pool = &mut supervisor.pools[index];
            pool.inherit(recover, runtime_dir.as_ref());
            pool.setup(loop_interval, &mut supervisor.manager, now_micros)?;
        }

        self.app.setup(&mut self.supervisor)?;
        suggest_priority(loop_interval);
        Ok(())
    }

    async fn run_loop(&mut self) -> Result<Outcome, DaemonError> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;
        let mut sigusr2 = signal(SignalKind::user_defined2())?;
        let mut sigcont = signal(SignalKind::from_raw(nix::libc::SIGCONT))?;

        let interval = self.supervisor.config.loop_interval;

        loop {
            if self.supervisor.shutdown {
                return Ok(Outcome::Shutdown);
            }
            if self.supervisor.restart {
                if lifecycle::is_detached_child() {
                    return Ok(Outcome::Restart);
                }
                warn!("restart requested but not detached; ignoring");
                self.supervisor.restart = false;
            }
            if lifecycle::is_detached_child()
                && self.supervisor.started.elapsed() >= self.supervisor.config.auto_restart_interval
            {
                info!("auto-restart interval reached");
                return Ok(Outcome::Restart);
            }

            let tick_start = self.supervisor.clock.now();

            // Reap exits first so pool maintenance sees live counts
            match self.supervisor.manager.reap() {
                Ok(reaped) => {
                    for reap in reaped {
                        self.supervisor.bus.dispatch(
                            EventKind::Reap,
                            &EventPayload::Reap {
                                group: reap.group,
                                pid: reap.pid,
                                exit_code: reap.exit_code,
                            },
                        );
                    }
                }
                Err(e @ ProcessError::Churn { .. }) => {
                    return Err(DaemonError::Process(e));
                }
                Err(e) => warn!(error = %e, "reap failed"),
            }

            self.supervisor
                .bus
                .dispatch(EventKind::Run, &EventPayload::None);

            let now_micros = self.supervisor.clock.micros();
            for index in 0..self.supervisor.pools.len() {
                let supervisor = &mut self.supervisor;
                let pool = &mut supervisor.pools[index];
                if let Err(e) = pool
                    .pre_execute(&mut supervisor.manager, tick_start, now_micros)
                    .await
                {
                    self.handle_pool_error(index, e, now_micros)?;
                }
            }

            if let Err(e) = self.app.execute(&mut self.supervisor) {
                self.supervisor
                    .bus
                    .dispatch(EventKind::Error, &EventPayload::Error(e.to_string()));
                warn!(error = %e, "user execute failed");
            }

            let duration = tick_start.elapsed();
            let idle = interval.as_secs_f64() - duration.as_secs_f64();
            self.supervisor.stats.push(TickStat { duration, idle });

            let residual = if interval.is_zero() {
                Duration::ZERO
            } else if duration >= interval {
                warn!(
                    took_ms = duration.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "run loop taking too long"
                );
                // Replace the residual with a short yield
                Duration::from_millis(2)
            } else {
                if duration.as_secs_f64() > interval.as_secs_f64() * 0.9 {
                    info!(
                        took_ms = duration.as_millis() as u64,
                        interval_ms = interval.as_millis() as u64,
                        "run loop approaching its interval"
                    );
                }
                interval - duration
            };

            if idle > 0.0 {
                self.supervisor
                    .bus
                    .dispatch(EventKind::Idle, &EventPayload::Idle(idle));
            }

            self.sleep_segment(
                residual,
                &mut sigterm,
                &mut sigint,
                &mut sighup,
                &mut sigusr1,
                &mut sigusr2,
                &mut sigcont,
            )
            .await;
        }
    }

    /// Residual sleep, woken early by signals. SIGCONT just wakes; the
    /// others apply their built-in behavior after being forwarded to
    /// `ON_SIGNAL` listeners.
    #[allow(clippy::too_many_arguments)]
    async fn sleep_segment(
        &mut self,
        residual: Duration,
        sigterm: &mut Signal,
        sigint: &mut Signal,
        sighup: &mut Signal,
        sigusr1: &mut Signal,
        sigusr2: &mut Signal,
        sigcont: &mut Signal,
    ) {
        let supervisor = &mut self.supervisor;
        tokio::select! {
            _ = tokio::time::sleep(residual) => {}
            _ = sigterm.recv() => {
                supervisor.bus.dispatch(EventKind::Signal, &EventPayload::Signal(nix::libc::SIGTERM));
                info!("SIGTERM received, beginning graceful shutdown");
                supervisor.shutdown = true;
            }
            _ = sigint.recv() => {
                supervisor.bus.dispatch(EventKind::Signal, &EventPayload::Signal(nix::libc::SIGINT));
                info!("SIGINT received, beginning graceful shutdown");
                supervisor.shutdown = true;
            }
            _ = sighup.recv() => {
                supervisor.bus.dispatch(EventKind::Signal, &EventPayload::Signal(nix::libc::SIGHUP));
                info!("SIGHUP received, restarting");
                supervisor.restart = true;
            }
            _ = sigusr1.recv() => {
                supervisor.bus.dispatch(EventKind::Signal, &EventPayload::Signal(nix::libc::SIGUSR1));
                supervisor.dump_stats();
            }
            _ = sigusr2.recv() => {
                // No built-in behavior; forwarded only
                supervisor.bus.dispatch(EventKind::Signal, &EventPayload::Signal(nix::libc::SIGUSR2));
            }
            _ = sigcont.recv() => {
                supervisor.bus.dispatch(EventKind::Signal, &EventPayload::Signal(nix::libc::SIGCONT));
                debug!("woken from interval sleep by SIGCONT");
            }
        }
    }

    /// Pool errors during pre-execute: corruption gets one rebuild pass,
    /// anything else that reaches here is fatal.
    fn handle_pool_error(
        &mut self,
        index: usize,
        error: PoolError,
        now_micros: u64,
    ) -> Result<(), DaemonError> {
        match error {
            PoolError::Transport(TransportError::Corruption(ref detail)) => {
                let pool = &mut self.supervisor.pools[index];
                warn!(pool = pool.alias(), detail, "store corruption, rebuilding");
                pool.rebuild(now_micros).map_err(DaemonError::from)
            }
            other => Err(DaemonError::from(other)),
        }
    }

    async fn shutdown_sequence(&mut self) {
        info!("shutting down");
        self.supervisor
            .bus
            .dispatch(EventKind::Shutdown, &EventPayload::None);
        self.app.teardown(&mut self.supervisor);
        self.supervisor.manager.shutdown().await;
        for pool in self.supervisor.pools.iter_mut() {
            pool.teardown();
        }
        for plugin in self.plugins.iter_mut().rev() {
            plugin.teardown();
        }
        for lock in self.locks.iter_mut().rev() {
            lock.teardown();
        }
    }

    /// Worker branch: this process was spawned for one pool.
    async fn run_worker(self, alias: &str) -> Result<(), DaemonError> {
        let index = self
            .supervisor
            .pool_index(alias)
            .ok_or_else(|| DaemonError::Fatal(format!("no pool '{alias}' registered in this binary")))?;

        // ON_FORK fires in the child, with the supervisor's callbacks
        self.supervisor.bus.dispatch(
            EventKind::Fork,
            &EventPayload::Fork {
                group: alias.to_string(),
                pid: std::process::id(),
            },
        );
        renice_self(5);

        let pool = &self.supervisor.pools[index];
        let methods = pool.methods().clone();
        let runtime_dir = self.supervisor.config.runtime_dir.clone();
        let mut runtime = WorkerRuntime::join(alias, methods, runtime_dir)?;
        runtime.run().await.map_err(DaemonError::from)
    }
}

/// Nice-value suggestion from the loop interval: tight loops ask for more
/// priority, slow loops give some back. Lacking the privilege only logs.
fn suggest_priority(interval: Duration) {
    let nice = if interval <= Duration::from_secs(1) {
        -1
    } else if interval <= Duration::from_secs(5) {
        0
    } else {
        5
    };
    if nice == 0 {
        return;
    }
    if !renice_self(nice) {
        info!(nice, "priority suggestion not applied (insufficient privilege?)");
    }
}

/// Shell out to renice(1); raising priority needs privilege and failing is
/// fine.
fn renice_self(nice: i32) -> bool {
    std::process::Command::new("renice")
        .args([
            "-n",
            &nice.to_string(),
            "-p",
            &std::process::id().to_string(),
        ])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
