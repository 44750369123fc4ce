// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport error taxonomy and per-role failure budgets.
//!
//! Errors fall into three classes. `communication` failures are expected to
//! clear after a reconnect and backoff; `corruption` means the store itself
//! is damaged and must be rebuilt; everything else lands in the catchall.
//! Each class has a counter with a role-dependent threshold — workers give
//! up earlier than the supervisor, which can replace them.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("queue communication failure: {0}")]
    Communication(#[source] io::Error),

    #[error("store corruption: {0}")]
    Corruption(String),

    #[error("store over capacity: {needed} bytes needed, {capacity} allocated")]
    Capacity { needed: u64, capacity: u64 },

    #[error("transport failure: {0}")]
    Catchall(String),
}

impl TransportError {
    /// Classification used by the failure budgets.
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Communication(_) => ErrorClass::Communication,
            TransportError::Corruption(_) => ErrorClass::Corruption,
            // Capacity is the caller's sizing problem, not transport decay
            TransportError::Capacity { .. } | TransportError::Catchall(_) => ErrorClass::Catchall,
        }
    }
}

/// Failure class for budget accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Communication,
    Corruption,
    Catchall,
}

stoker_core::simple_display! {
    ErrorClass {
        Communication => "communication",
        Corruption => "corruption",
        Catchall => "catchall",
    }
}

/// Which side of the transport this endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Supervisor,
    Worker,
}

impl Role {
    fn threshold(&self, class: ErrorClass) -> u32 {
        match (self, class) {
            (Role::Supervisor, ErrorClass::Communication) => 10,
            (Role::Supervisor, ErrorClass::Corruption) => 3,
            (Role::Supervisor, ErrorClass::Catchall) => 25,
            (Role::Worker, ErrorClass::Communication) => 5,
            (Role::Worker, ErrorClass::Corruption) => 1,
            (Role::Worker, ErrorClass::Catchall) => 10,
        }
    }
}

/// Per-class failure counters with role-dependent thresholds.
///
/// `record` returns `true` while the budget still has headroom; a `false`
/// return means the class threshold was crossed and the caller must treat
/// the condition as fatal for its role.
#[derive(Debug)]
pub struct ErrorBudget {
    role: Role,
    communication: u32,
    corruption: u32,
    catchall: u32,
}

impl ErrorBudget {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            communication: 0,
            corruption: 0,
            catchall: 0,
        }
    }

    pub fn record(&mut self, class: ErrorClass) -> bool {
        let count = match class {
            ErrorClass::Communication => {
                self.communication += 1;
                self.communication
            }
            ErrorClass::Corruption => {
                self.corruption += 1;
                self.corruption
            }
            ErrorClass::Catchall => {
                self.catchall += 1;
                self.catchall
            }
        };
        count < self.role.threshold(class)
    }

    /// Clear a class counter after the condition recovered.
    pub fn reset(&mut self, class: ErrorClass) {
        match class {
            ErrorClass::Communication => self.communication = 0,
            ErrorClass::Corruption => self.corruption = 0,
            ErrorClass::Catchall => self.catchall = 0,
        }
    }

    pub fn count(&self, class: ErrorClass) -> u32 {
        match class {
            ErrorClass::Communication => self.communication,
            ErrorClass::Corruption => self.corruption,
            ErrorClass::Catchall => self.catchall,
        }
    }
}

/// Exponential backoff: `delay * 2^min(attempt, 8)`.
pub fn backoff(delay: Duration, attempt: u32) -> Duration {
    delay.saturating_mul(1u32 << attempt.min(8))
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
