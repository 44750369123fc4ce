// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker method registry.
//!
//! Payloads cross the process boundary fully serialized; the method name in
//! a call discriminates into handlers registered here at startup. A name
//! the registry does not know fails immediately, before any IPC.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Method the call sugar `pool.invoke(args)` dispatches to.
pub const EXECUTE_METHOD: &str = "execute";

/// Errors surfaced by method dispatch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MethodError {
    #[error("unknown method '{0}'")]
    Unknown(String),

    #[error("method '{method}' failed: {message}")]
    Failed { method: String, message: String },

    #[error("method '{method}' rejected its arguments: {message}")]
    BadArgs { method: String, message: String },
}

/// A callable operation exposed by a worker pool.
///
/// Implementations run inside worker processes; args and return values are
/// plain JSON so no live addresses cross the process boundary.
pub trait WorkerMethod: Send + Sync {
    fn invoke(&self, args: Value) -> Result<Value, MethodError>;
}

impl<F> WorkerMethod for F
where
    F: Fn(Value) -> Result<Value, MethodError> + Send + Sync,
{
    fn invoke(&self, args: Value) -> Result<Value, MethodError> {
        self(args)
    }
}

/// Wrap a plain closure as a [`WorkerMethod`].
pub fn method_fn<F>(f: F) -> Arc<dyn WorkerMethod>
where
    F: Fn(Value) -> Result<Value, MethodError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Name-to-handler table shared by the supervisor (for validation) and the
/// worker runtime (for dispatch).
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn WorkerMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, method: Arc<dyn WorkerMethod>) {
        self.methods.insert(name.into(), method);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Sorted method names, for diagnostics.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch `args` to the handler registered under `name`.
    pub fn invoke(&self, name: &str, args: Value) -> Result<Value, MethodError> {
        match self.methods.get(name) {
            Some(method) => method.invoke(args),
            None => Err(MethodError::Unknown(name.to_string())),
        }
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[path = "methods_tests.rs"]
mod tests;
