// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-instance locks.
//!
//! A lock is a plug-in that additionally guarantees mutual exclusion across
//! supervisor instances. Locks are acquired during `ON_INIT` dispatch — that
//! is, before any worker is spawned — so a duplicate instance is detected
//! while it is still cheap to abort. Lock contents self-expire after a TTL
//! of the loop interval plus padding, covering providers without liveness.

use crate::plugin::{Plugin, PluginError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Slack added to the loop interval to form the lock TTL.
pub const TTL_PADDING: Duration = Duration::from_secs(2);

/// Mutual-exclusion provider across supervisor instances.
pub trait Lock: Plugin {
    /// Take the lock, failing with the conflicting owner when held.
    fn acquire(&mut self) -> Result<(), PluginError>;

    /// Identify a conflicting owner without acquiring; `None` means free.
    fn test(&self) -> Result<Option<String>, PluginError>;
}

/// Advisory-file lock: the file holds `pid@micros`, exclusivity comes from
/// an OS advisory lock which also releases on crash.
pub struct FileLock {
    path: PathBuf,
    ttl: Duration,
    held: Option<File>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, loop_interval: Duration) -> Self {
        Self {
            path: path.into(),
            ttl: loop_interval + TTL_PADDING,
            held: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn stamp() -> String {
        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        format!("{}@{}", std::process::id(), micros)
    }

    /// Read the `pid@micros` contents, if any.
    fn read_owner(&self) -> Result<Option<String>, PluginError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let contents = contents.trim().to_string();
        Ok((!contents.is_empty()).then_some(contents))
    }

    /// True when a `pid@micros` stamp is older than the TTL.
    fn expired(&self, owner: &str) -> bool {
        let Some((_, micros)) = owner.split_once('@') else {
            return true;
        };
        let Ok(stamped) = micros.parse::<u64>() else {
            return true;
        };
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        now.saturating_sub(stamped) > self.ttl.as_micros() as u64
    }
}

impl Plugin for FileLock {
    fn name(&self) -> &str {
        "file-lock"
    }

    fn check_environment(&self) -> Vec<String> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                vec![format!("lock directory {} does not exist", parent.display())]
            }
            _ => Vec::new(),
        }
    }

    fn teardown(&mut self) {
        if self.held.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Lock for FileLock {
    fn acquire(&mut self) -> Result<(), PluginError> {
        // Open without truncating so a holder's stamp survives our probe
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        if file.try_lock_exclusive().is_err() {
            let owner = self
                .read_owner()?
                .unwrap_or_else(|| "unknown owner".to_string());
            return Err(PluginError::LockHeld {
                plugin: self.name().to_string(),
                owner,
            });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", Self::stamp())?;
        self.held = Some(file);
        Ok(())
    }

    fn test(&self) -> Result<Option<String>, PluginError> {
        if self.held.is_some() {
            // We are the owner
            return Ok(None);
        }
        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if file.try_lock_exclusive().is_ok() {
            // Nobody holds the advisory lock; a leftover stamp only counts
            // while it is within its TTL
            return match self.read_owner()? {
                Some(owner) if !self.expired(&owner) => Ok(Some(owner)),
                _ => Ok(None),
            };
        }
        Ok(Some(
            self.read_owner()?
                .unwrap_or_else(|| "unknown owner".to_string()),
        ))
    }
}

/// Lock that always acquires; for single-instance-by-construction setups.
#[derive(Debug, Default)]
pub struct NullLock;

impl Plugin for NullLock {
    fn name(&self) -> &str {
        "null-lock"
    }
}

impl Lock for NullLock {
    fn acquire(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn test(&self) -> Result<Option<String>, PluginError> {
        Ok(None)
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
