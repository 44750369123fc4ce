// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process creation, grouping, reaping and churn detection.
//!
//! Workers are the supervisor's own executable re-spawned with the pool
//! environment marker set — the portable rendition of fork that keeps a
//! crashing worker from touching supervisor state. The manager tracks every
//! child by pid and group, reaps exits non-blockingly each tick, and trips
//! a fatal churn error when freshly spawned processes keep dying before
//! their minimum time-to-live (a fork storm in the making).

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::time::{Duration, Instant};
use stoker_core::CallId;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Environment marker that routes `Daemon::run` into the worker runtime.
pub const WORKER_POOL_ENV: &str = "STOKER_WORKER_POOL";

/// Default minimum time-to-live; exits under this count as churn.
pub const MIN_TTL: Duration = Duration::from_secs(5);

/// Rolling window for churn accounting.
pub const CHURN_WINDOW: Duration = Duration::from_secs(120);

/// Premature exits tolerated inside the window before going fatal.
pub const CHURN_LIMIT: usize = 5;

/// Errors raised by process management.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn worker for group '{group}': {message}")]
    Spawn { group: String, message: String },

    #[error(
        "recently forked processes are continuously failing: \
         {count} premature exits inside {window_secs}s"
    )]
    Churn { count: usize, window_secs: u64 },

    #[error("no such process {0}")]
    Unknown(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One supervised child.
#[derive(Debug)]
pub struct Process {
    pub pid: u32,
    pub group: String,
    pub started: Instant,
    /// Call this worker is executing, per the latest running ack.
    pub current_call: Option<CallId>,
    pub min_ttl: Duration,
    /// Grace given on stop before escalating to a kill.
    pub stop_deadline: Duration,
    child: Child,
}

/// A reaped child exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaped {
    pub pid: u32,
    pub group: String,
    pub exit_code: Option<i32>,
    pub premature: bool,
}

type WorkerLauncher = Box<dyn Fn(&str) -> Command + Send>;

/// Creates, tracks and reaps worker processes.
#[derive(Default)]
pub struct ProcessManager {
    processes: HashMap<u32, Process>,
    premature_exits: VecDeque<Instant>,
    launcher: Option<WorkerLauncher>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("processes", &self.processes.keys().collect::<Vec<_>>())
            .field("premature_exits", &self.premature_exits.len())
            .finish()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how worker commands are built. The default re-spawns this
    /// executable with its original arguments; embedding hosts with their
    /// own entry point can substitute theirs. The pool marker is applied
    /// either way.
    pub fn set_worker_launcher(&mut self, launcher: impl Fn(&str) -> Command + Send + 'static) {
        self.launcher = Some(Box::new(launcher));
    }

    /// Spawn a worker for `group`: this executable, original arguments,
    /// the pool marker plus `envs` in its environment.
    pub fn spawn_worker(
        &mut self,
        group: &str,
        envs: &[(String, String)],
        stop_deadline: Duration,
    ) -> Result<u32, ProcessError> {
        let mut command = match self.launcher.as_ref() {
            Some(launcher) => launcher(group),
            None => {
                let exe = std::env::current_exe()?;
                let mut command = Command::new(exe);
                command.args(std::env::args().skip(1));
                command
            }
        };
        command.env(WORKER_POOL_ENV, group);
        self.spawn_command(group, command, envs, stop_deadline)
    }

    /// Spawn an arbitrary command into `group`. Lower-level seam used by
    /// `spawn_worker` and by tests.
    pub fn spawn_command(
        &mut self,
        group: &str,
        mut command: Command,
        envs: &[(String, String)],
        stop_deadline: Duration,
    ) -> Result<u32, ProcessError> {
        for (key, value) in envs {
            command.env(key, value);
        }
        command.stdin(Stdio::null());
        command.kill_on_drop(true);

        let child = command.spawn().map_err(|e| ProcessError::Spawn {
            group: group.to_string(),
            message: e.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| ProcessError::Spawn {
            group: group.to_string(),
            message: "child exited before it could be tracked".to_string(),
        })?;

        debug!(group, pid, "worker spawned");
        self.processes.insert(
            pid,
            Process {
                pid,
                group: group.to_string(),
                started: Instant::now(),
                current_call: None,
                min_ttl: MIN_TTL,
                stop_deadline,
                child,
            },
        );
        Ok(pid)
    }

    /// Collect every exited child, removing it from its group.
    ///
    /// Premature exits (before `min_ttl`) feed the churn window; more than
    /// [`CHURN_LIMIT`] of them inside [`CHURN_WINDOW`] is fatal — the
    /// reaps collected so far are lost to the error, which ends the
    /// supervisor anyway.
    pub fn reap(&mut self) -> Result<Vec<Reaped>, ProcessError> {
        let mut exited = Vec::new();
        for (pid, process) in self.processes.iter_mut() {
            if let Ok(Some(status)) = process.child.try_wait() {
                exited.push((*pid, status.code()));
            }
        }

        let now = Instant::now();
        let mut reaped = Vec::new();
        for (pid, exit_code) in exited {
            let Some(process) = self.processes.remove(&pid) else {
                continue;
            };
            let premature = process.started.elapsed() < process.min_ttl;
            if premature {
                self.premature_exits.push_back(now);
            }
            debug!(pid, group = %process.group, ?exit_code, premature, "reaped worker");
            reaped.push(Reaped {
                pid,
                group: process.group,
                exit_code,
                premature,
            });
        }

        while let Some(front) = self.premature_exits.front() {
            if now.duration_since(*front) > CHURN_WINDOW {
                self.premature_exits.pop_front();
            } else {
                break;
            }
        }
        if self.premature_exits.len() > CHURN_LIMIT {
            return Err(ProcessError::Churn {
                count: self.premature_exits.len(),
                window_secs: CHURN_WINDOW.as_secs(),
            });
        }

        Ok(reaped)
    }

    /// Graceful stop: terminate, wait out the stop deadline, then kill.
    pub async fn stop(&mut self, pid: u32) -> Result<Option<i32>, ProcessError> {
        let mut process = self
            .processes
            .remove(&pid)
            .ok_or(ProcessError::Unknown(pid))?;

        send_signal(pid, Signal::SIGTERM);
        let status = match tokio::time::timeout(process.stop_deadline, process.child.wait()).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(pid, group = %process.group, "stop deadline passed, killing");
                // start_kill fails when the child just exited; wait anyway
                let _ = process.child.start_kill();
                process.child.wait().await?
            }
        };
        Ok(status.code())
    }

    /// Immediate kill, used by timeout enforcement. A child that already
    /// exited on its own is not an error.
    pub async fn kill(&mut self, pid: u32) -> Result<(), ProcessError> {
        let mut process = self
            .processes
            .remove(&pid)
            .ok_or(ProcessError::Unknown(pid))?;
        let _ = process.child.start_kill();
        let _ = process.child.wait().await;
        info!(pid, group = %process.group, "worker killed");
        Ok(())
    }

    /// Teardown drain: keep stopping, reaping and briefly sleeping until no
    /// process remains. Exits here never feed the churn window.
    pub async fn shutdown(&mut self) {
        let started = Instant::now();
        for process in self.processes.values() {
            send_signal(process.pid, Signal::SIGTERM);
        }

        while !self.processes.is_empty() {
            let mut done = Vec::new();
            for (pid, process) in self.processes.iter_mut() {
                if started.elapsed() > process.stop_deadline {
                    let _ = process.child.start_kill();
                }
                if let Ok(Some(_)) = process.child.try_wait() {
                    done.push(*pid);
                }
            }
            for pid in done {
                self.processes.remove(&pid);
            }
            if !self.processes.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
    }

    pub fn count(&self, group: Option<&str>) -> usize {
        match group {
            Some(group) => self
                .processes
                .values()
                .filter(|p| p.group == group)
                .count(),
            None => self.processes.len(),
        }
    }

    pub fn pids(&self, group: Option<&str>) -> Vec<u32> {
        self.processes
            .values()
            .filter(|p| group.is_none_or(|g| p.group == g))
            .map(|p| p.pid)
            .collect()
    }

    pub fn process(&self, pid: u32) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Record which call a worker is executing (from a running ack).
    pub fn set_current_call(&mut self, pid: u32, call: Option<CallId>) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.current_call = call;
        }
    }

    /// Premature exits currently inside the churn window.
    pub fn churn_pressure(&self) -> usize {
        self.premature_exits.len()
    }
}

/// Best-effort signal delivery; a vanished pid is not an error.
fn send_signal(pid: u32, signal: Signal) {
    if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
        debug!(pid, %signal, error = %e, "signal not delivered");
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
