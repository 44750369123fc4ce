// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line surface of a stoker-hosted daemon.
//!
//! Host binaries embed this with `#[command(flatten)]` or parse it directly.
//! Help and version output (exit 0) are clap's standard behavior.

use clap::Parser;
use std::path::PathBuf;

/// Daemon runtime flags.
#[derive(Debug, Clone, Default, Parser)]
pub struct DaemonOptions {
    /// Detach and run in the background
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Write the supervisor pid to this file
    #[arg(short = 'p', long, value_name = "PATH")]
    pub pid_file: Option<PathBuf>,

    /// Re-attach to existing pool resources instead of purging them
    #[arg(long)]
    pub recover: bool,

    /// Base directory for pool queues and stores
    #[arg(long, value_name = "DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// Accepted for compatibility; the interactive worker console is not
    /// part of this runtime
    #[arg(long)]
    pub debug_workers: bool,
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
