// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemonization plumbing: detach, pid file, exec-based restart.

use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment marker set on the background re-spawn of the supervisor.
pub const DETACHED_ENV: &str = "STOKER_DETACHED";

/// True when this process is the detached re-spawn.
pub fn is_detached_child() -> bool {
    std::env::var(DETACHED_ENV).map(|v| !v.is_empty()).unwrap_or(false)
}

/// Re-spawn this executable in the background with the detach marker set
/// and stdio detached. The caller (the foreground parent) should exit.
///
/// Returns the child pid.
pub fn spawn_detached() -> std::io::Result<u32> {
    let exe = std::env::current_exe()?;
    let child = std::process::Command::new(exe)
        .args(std::env::args().skip(1))
        .env(DETACHED_ENV, "1")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    Ok(child.id())
}

/// Replace this process with a fresh copy of itself, preserving the
/// original arguments (including any pid-file argument). Only returns on
/// failure.
pub fn exec_restart() -> std::io::Error {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e,
    };
    info!(exe = %exe.display(), "restarting by exec");
    std::process::Command::new(exe)
        .args(std::env::args().skip(1))
        .exec()
}

/// Locked pid file. Holding the lock is what excludes a second instance;
/// the contents let outside tooling find the supervisor.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    // NOTE(lifetime): held to maintain the exclusive lock; released on drop
    #[allow(dead_code)]
    file: File,
}

impl PidFile {
    /// Acquire the pid file: lock first, then write our pid.
    ///
    /// The file is opened without truncating so a failed lock leaves the
    /// running owner's pid intact.
    pub fn write(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("pid file {} is locked, daemon already running?", path.display()),
            )
        })?;

        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file, but only while its contents still name this
    /// process — a replacement instance's file must survive us.
    pub fn remove_if_owner(self) {
        let ours = std::process::id().to_string();
        let recorded = std::fs::read_to_string(&self.path).unwrap_or_default();
        if recorded.trim() == ours {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
