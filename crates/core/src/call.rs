// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Call identity and state machine.
//!
//! A [`Call`] is one invocation of a worker method: an immutable identity
//! plus a mutable status/timestamp log and the args/return payloads. Status
//! moves are strictly monotone except for the legal reset to `Uncalled`
//! performed by [`Call::retry`].

use crate::envelope::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// First id handed out for calls. Ids below this address transport
/// metadata (the store header lives at slot 1).
pub const FIRST_CALL_ID: u64 = 2;

/// Retry ceiling; a call that times out past this is cancelled for good.
pub const MAX_RETRIES: u32 = 3;

/// Unique identifier for a call within one supervisor lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl CallId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(&self) -> CallId {
        CallId(self.0 + 1)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CallId {
    fn from(v: u64) -> Self {
        CallId(v)
    }
}

/// Lifecycle status of a call.
///
/// Ordered by rank; `Timeout` ranks above the others so a timed-out call
/// can never move again except through [`Call::retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Uncalled,
    Called,
    Running,
    Returned,
    Cancelled,
    Timeout,
}

impl CallStatus {
    /// Numeric rank used for monotonicity checks.
    pub fn rank(&self) -> u8 {
        match self {
            CallStatus::Uncalled => 0,
            CallStatus::Called => 1,
            CallStatus::Running => 2,
            CallStatus::Returned => 3,
            CallStatus::Cancelled => 4,
            CallStatus::Timeout => 10,
        }
    }

    /// A call is active until it reaches a terminal status.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            CallStatus::Returned | CallStatus::Cancelled | CallStatus::Timeout
        )
    }
}

crate::simple_display! {
    CallStatus {
        Uncalled => "uncalled",
        Called => "called",
        Running => "running",
        Returned => "returned",
        Cancelled => "cancelled",
        Timeout => "timeout",
    }
}

/// Per-status transition timestamps in epoch microseconds.
///
/// One slot per status; a slot is written when the call transitions into
/// that status (a retry rewrites the `uncalled` slot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTimes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncalled: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub called: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl CallTimes {
    pub fn get(&self, status: CallStatus) -> Option<u64> {
        match status {
            CallStatus::Uncalled => self.uncalled,
            CallStatus::Called => self.called,
            CallStatus::Running => self.running,
            CallStatus::Returned => self.returned,
            CallStatus::Cancelled => self.cancelled,
            CallStatus::Timeout => self.timeout,
        }
    }

    pub fn set(&mut self, status: CallStatus, micros: u64) {
        let slot = match status {
            CallStatus::Uncalled => &mut self.uncalled,
            CallStatus::Called => &mut self.called,
            CallStatus::Running => &mut self.running,
            CallStatus::Returned => &mut self.returned,
            CallStatus::Cancelled => &mut self.cancelled,
            CallStatus::Timeout => &mut self.timeout,
        };
        *slot = Some(micros);
    }
}

/// Errors raised by call state operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("illegal transition for call {id}: {from} -> {to}")]
    IllegalTransition {
        id: CallId,
        from: CallStatus,
        to: CallStatus,
    },

    #[error("call {id} exhausted its {retries} retries")]
    RetriesExhausted { id: CallId, retries: u32 },

    #[error("call {id} is still active, refusing to collect it")]
    StillActive { id: CallId },
}

/// One invocation of a worker method with its lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub method: String,
    /// Arguments payload; cleared by GC and on abandoned sends.
    pub args: Option<Value>,
    /// Return payload written back by the worker; cleared by GC.
    pub result: Option<Value>,
    pub status: CallStatus,
    /// Pid of the worker executing this call, recorded on the running ack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_pid: Option<u32>,
    pub retries: u32,
    /// Transient transport errors during the current send attempt.
    pub errors: u32,
    /// Serialized payload size in bytes, recorded by the transport.
    pub size: u64,
    /// True once GC cleared the heavy fields.
    pub collected: bool,
    pub times: CallTimes,
}

impl Call {
    /// Create a fresh `Uncalled` call.
    pub fn new(id: CallId, method: impl Into<String>, args: Value, now_micros: u64) -> Self {
        let mut times = CallTimes::default();
        times.set(CallStatus::Uncalled, now_micros);
        Self {
            id,
            method: method.into(),
            args: Some(args),
            result: None,
            status: CallStatus::Uncalled,
            worker_pid: None,
            retries: 0,
            errors: 0,
            size: 0,
            collected: false,
            times,
        }
    }

    /// Move the call to `to`, recording the transition time.
    ///
    /// Backwards moves are rejected; the only legal reset is to `Uncalled`,
    /// which [`Call::retry`] performs.
    pub fn transition(&mut self, to: CallStatus, now_micros: u64) -> Result<(), CallError> {
        if to.rank() < self.status.rank() && to != CallStatus::Uncalled {
            return Err(CallError::IllegalTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.times.set(to, now_micros);
        Ok(())
    }

    /// Reset to `Uncalled` for re-dispatch, bumping the retry counter.
    ///
    /// Returns the new retry count. Fails once [`MAX_RETRIES`] attempts have
    /// been used; callers must treat that as a permanent failure.
    pub fn retry(&mut self, now_micros: u64) -> Result<u32, CallError> {
        if self.retries >= MAX_RETRIES {
            return Err(CallError::RetriesExhausted {
                id: self.id,
                retries: self.retries,
            });
        }
        self.retries += 1;
        self.errors = 0;
        self.worker_pid = None;
        self.status = CallStatus::Uncalled;
        self.times.set(CallStatus::Uncalled, now_micros);
        Ok(self.retries)
    }

    /// A call is active until it reaches a terminal status.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Wall time spent executing: `returned - running`, or `now - running`
    /// while still running. `None` before the first running ack.
    pub fn runtime(&self, now_micros: u64) -> Option<Duration> {
        let started = self.times.running?;
        let end = self.times.returned.unwrap_or(now_micros);
        Some(Duration::from_micros(end.saturating_sub(started)))
    }

    /// Clear the heavy payload fields of an inactive call.
    pub fn gc(&mut self) -> Result<(), CallError> {
        if self.is_active() {
            return Err(CallError::StillActive { id: self.id });
        }
        self.args = None;
        self.result = None;
        self.collected = true;
        Ok(())
    }

    /// Microtime of the most recent transition (the current status slot).
    pub fn microtime(&self) -> u64 {
        self.times.get(self.status).unwrap_or(0)
    }

    /// Project the transport envelope for the current status.
    pub fn header(&self, sender_pid: u32) -> Envelope {
        Envelope {
            call_id: self.id,
            status: self.status,
            microtime: self.microtime(),
            sender_pid,
        }
    }
}

crate::builder! {
    pub struct CallBuilder => Call {
        into {
            method: String = "execute",
        }
        set {
            id: CallId = CallId(FIRST_CALL_ID),
            status: CallStatus = CallStatus::Uncalled,
            retries: u32 = 0,
            errors: u32 = 0,
            size: u64 = 0,
            collected: bool = false,
            times: CallTimes = CallTimes::default(),
        }
        option {
            args: Value = None,
            result: Value = None,
            worker_pid: u32 = None,
        }
    }
}

#[cfg(test)]
#[path = "call_tests.rs"]
mod tests;
