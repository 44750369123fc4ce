// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-size message header placed on the typed queues.
//!
//! The envelope is small and cheap to move; the bulk of a call (args,
//! return) lives in the shared store keyed by `call_id`.

use crate::call::{CallId, CallStatus};
use serde::{Deserialize, Serialize};

/// Transport header for one call message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub call_id: CallId,
    pub status: CallStatus,
    /// Microtime of the transition that produced this envelope. A worker
    /// uses it to detect that the stored call was superseded (re-queued).
    pub microtime: u64,
    /// Pid of the sending process; diagnostic only.
    pub sender_pid: u32,
}

/// The three typed queues a pool carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Worker inbox: new and retried calls, consumed by workers.
    Calls,
    /// Running acks: workers announce they picked a call up.
    Running,
    /// Return acks: workers announce a call finished.
    Returns,
}

impl QueueKind {
    /// Queue a status is published to. Statuses outside the mapping never
    /// cross the process boundary.
    pub fn for_status(status: CallStatus) -> Option<QueueKind> {
        match status {
            CallStatus::Uncalled => Some(QueueKind::Calls),
            CallStatus::Running => Some(QueueKind::Running),
            CallStatus::Returned => Some(QueueKind::Returns),
            _ => None,
        }
    }

    /// On-disk file name of this queue.
    pub fn file_name(&self) -> &'static str {
        match self {
            QueueKind::Calls => "calls.q",
            QueueKind::Running => "running.q",
            QueueKind::Returns => "returns.q",
        }
    }
}

crate::simple_display! {
    QueueKind {
        Calls => "calls",
        Running => "running",
        Returns => "returns",
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
