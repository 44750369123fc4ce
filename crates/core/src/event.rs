// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor event kinds and payloads.
//!
//! Events fan out through the daemon's event bus to registered callbacks.
//! The kinds mirror the supervisor lifecycle: init, per-tick run, forks and
//! reaps, signals, idle time, errors, shutdown.

use serde::{Deserialize, Serialize};

/// Kind of a supervisor event, used to key callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Error,
    Signal,
    Init,
    Run,
    Fork,
    Reap,
    PidChange,
    Idle,
    Shutdown,
}

crate::simple_display! {
    EventKind {
        Error => "on_error",
        Signal => "on_signal",
        Init => "on_init",
        Run => "on_run",
        Fork => "on_fork",
        Reap => "on_reap",
        PidChange => "on_pidchange",
        Idle => "on_idle",
        Shutdown => "on_shutdown",
    }
}

/// Data carried to event callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// No payload (init, run, shutdown).
    None,
    /// Raw signal number being forwarded.
    Signal(i32),
    /// Fatal or recoverable error description.
    Error(String),
    /// A worker process was spawned into `group`.
    Fork { group: String, pid: u32 },
    /// A child exit was reaped.
    Reap {
        group: String,
        pid: u32,
        exit_code: Option<i32>,
    },
    /// The supervisor pid changed (detach re-spawn).
    PidChange { old: u32, new: u32 },
    /// Idle seconds left in the tick after user work.
    Idle(f64),
}

impl EventPayload {
    /// Signal number, if this is a signal payload.
    pub fn signal(&self) -> Option<i32> {
        match self {
            EventPayload::Signal(s) => Some(*s),
            _ => None,
        }
    }

    /// Error text, if this is an error payload.
    pub fn error(&self) -> Option<&str> {
        match self {
            EventPayload::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
