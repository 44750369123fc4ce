// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plug-in extension point.
//!
//! Plug-ins are constructed before the supervisor starts, asked to vet the
//! environment (any reported problem is fatal at init), set up in declared
//! order, and torn down in reverse order at shutdown.

use thiserror::Error;

/// Errors raised by plug-in lifecycle hooks.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{plugin}' setup failed: {message}")]
    Setup { plugin: String, message: String },

    #[error("lock '{plugin}' is held by {owner}")]
    LockHeld { plugin: String, owner: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Supervisor extension hooks.
pub trait Plugin: Send {
    /// Stable name used in logs and error messages.
    fn name(&self) -> &str;

    /// Problems that make starting pointless (missing paths, bad config).
    /// Every returned string is reported; any at all aborts init.
    fn check_environment(&self) -> Vec<String> {
        Vec::new()
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn teardown(&mut self) {}
}
