// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logging setup for supervisor and worker processes.
//!
//! Foreground runs log to stderr. Detached runs log to a file through a
//! non-blocking appender; the file is size-rotated at startup so a
//! long-lived daemon cannot grow one unbounded log.

use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Install the global subscriber.
///
/// With a path, logs append to that file and the returned guard must be
/// held for the lifetime of the process; without one, logs go to stderr.
/// Returns `None` (harmlessly) when a subscriber is already installed.
pub fn init(
    log_path: Option<&Path>,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_path {
        Some(path) => {
            rotate_if_needed(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(dir) = dir {
                std::fs::create_dir_all(dir)?;
            }
            let file_name = path
                .file_name()
                .ok_or_else(|| std::io::Error::other("log path has no file name"))?;
            let appender = tracing_appender::rolling::never(
                dir.unwrap_or_else(|| Path::new(".")),
                file_name,
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let installed = tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init()
                .is_ok();
            Ok(installed.then_some(guard))
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init();
            Ok(None)
        }
    }
}

/// Rotate `path` → `.1` → `.2` → `.3` once it exceeds [`MAX_LOG_SIZE`].
/// Best-effort: failures never prevent startup.
fn rotate_if_needed(path: &Path) {
    let size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let base = path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{base}.{i}"), format!("{base}.{}", i + 1));
    }
    let _ = std::fs::rename(path, format!("{base}.1"));
}
