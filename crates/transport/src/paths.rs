// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic pool resource locations.
//!
//! A pool's queues and store live under a directory named from the pool
//! alias and a hash of the supervisor executable path. The same binary with
//! the same alias always resolves to the same directory, which is what lets
//! a restarted supervisor (or a `--recover` attach) find its resources.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Environment override for the runtime base directory. Worker processes
/// inherit this from the supervisor so both sides agree on paths.
pub const RUNTIME_DIR_ENV: &str = "STOKER_RUNTIME_DIR";

/// Base directory for pool resources: `$STOKER_RUNTIME_DIR`, else a
/// per-user directory under the system temp dir.
pub fn default_runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(RUNTIME_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    std::env::temp_dir().join("stoker")
}

/// Resource directory for `alias`, keyed off the current executable.
pub fn pool_dir(base: &Path, alias: &str) -> PathBuf {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("stoker"));
    pool_dir_for(base, &exe, alias)
}

/// Resource directory for `alias` under `base`, keyed off `exe`.
pub fn pool_dir_for(base: &Path, exe: &Path, alias: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(exe.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(alias.as_bytes());
    let digest = hasher.finalize();
    let tag: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    base.join("pools").join(format!("{alias}-{tag}"))
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
