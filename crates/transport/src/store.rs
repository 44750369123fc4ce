// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content-addressed call payload store.
//!
//! One JSON file per call under `store/`, plus a reserved header slot
//! (`header.json`, logically slot 1) recording the store version and the
//! allocated byte budget. Writes go through a temp file and an atomic
//! rename so a reader never observes a half-written call.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use stoker_core::{Call, CallId};
use tracing::warn;

/// Store format version carried in the header slot.
pub const STORE_VERSION: u32 = 2;

/// Reserved metadata slot (logical id 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub version: u32,
    pub allocated_bytes: u64,
}

/// Payload store for one pool.
#[derive(Debug)]
pub struct CallStore {
    dir: PathBuf,
    store_dir: PathBuf,
    header_path: PathBuf,
    capacity: u64,
}

impl CallStore {
    /// Create a fresh store under `dir` with the given byte budget.
    pub fn create(dir: &Path, allocated_bytes: u64) -> Result<Self, TransportError> {
        let store = Self::locate(dir, allocated_bytes);
        fs::create_dir_all(&store.store_dir).map_err(TransportError::Communication)?;
        store.write_header(&StoreHeader {
            version: STORE_VERSION,
            allocated_bytes,
        })?;
        Ok(store)
    }

    /// Attach to an existing store, validating the header slot.
    ///
    /// A missing, unparseable, or non-object header is corruption — the
    /// caller decides whether to purge or rebuild.
    pub fn attach(dir: &Path) -> Result<Self, TransportError> {
        let probe = Self::locate(dir, 0);
        let header = probe.read_header()?;
        if header.version != STORE_VERSION {
            return Err(TransportError::Corruption(format!(
                "header version {} does not match {}",
                header.version, STORE_VERSION
            )));
        }
        Ok(Self::locate(dir, header.allocated_bytes))
    }

    fn locate(dir: &Path, capacity: u64) -> Self {
        Self {
            store_dir: dir.join("store"),
            header_path: dir.join("header.json"),
            dir: dir.to_path_buf(),
            capacity,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn read_header(&self) -> Result<StoreHeader, TransportError> {
        let raw = fs::read_to_string(&self.header_path)
            .map_err(|e| TransportError::Corruption(format!("header unreadable: {e}")))?;
        // A reserved slot holding anything but an object is damage
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| TransportError::Corruption(format!("header unparseable: {e}")))?;
        if !value.is_object() {
            return Err(TransportError::Corruption(
                "header slot holds a non-object value".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| TransportError::Corruption(format!("header fields: {e}")))
    }

    fn write_header(&self, header: &StoreHeader) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(header)
            .map_err(|e| TransportError::Catchall(format!("encode header: {e}")))?;
        self.atomic_write(&self.header_path, &bytes)
    }

    /// Serialize `call` into its slot, recording the size on the call.
    ///
    /// Fails with a capacity error when the store budget would be exceeded;
    /// rewriting an existing slot only accounts the size delta.
    pub fn write_call(&self, call: &mut Call) -> Result<(), TransportError> {
        let path = self.call_path(call.id);
        let previous = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        // Two-pass encode: record the size field, then persist it
        let probe = serde_json::to_vec(&*call)
            .map_err(|e| TransportError::Catchall(format!("encode call {}: {e}", call.id)))?;
        call.size = probe.len() as u64;
        let bytes = serde_json::to_vec(&*call)
            .map_err(|e| TransportError::Catchall(format!("encode call {}: {e}", call.id)))?;

        let needed = self.used_bytes()?.saturating_sub(previous) + bytes.len() as u64;
        if self.capacity > 0 && needed > self.capacity {
            return Err(TransportError::Capacity {
                needed,
                capacity: self.capacity,
            });
        }

        self.atomic_write(&path, &bytes)
    }

    /// Read the call in slot `id`, or `None` when the slot is empty.
    pub fn read_call(&self, id: CallId) -> Result<Option<Call>, TransportError> {
        let raw = match fs::read_to_string(self.call_path(id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransportError::Communication(e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| TransportError::Corruption(format!("call {id} unparseable: {e}")))
    }

    /// Drop the slot for `id`; absent slots are fine.
    pub fn remove_call(&self, id: CallId) -> Result<(), TransportError> {
        match fs::remove_file(self.call_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::Communication(e)),
        }
    }

    /// Every parseable call currently stored. Damaged slots are skipped
    /// with a warning so one bad file cannot block recovery.
    pub fn live_calls(&self) -> Result<Vec<Call>, TransportError> {
        let mut calls = Vec::new();
        let entries = match fs::read_dir(&self.store_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(calls),
            Err(e) => return Err(TransportError::Communication(e)),
        };
        for entry in entries {
            let entry = entry.map_err(TransportError::Communication)?;
            match fs::read_to_string(entry.path()) {
                Ok(raw) => match serde_json::from_str::<Call>(&raw) {
                    Ok(call) => calls.push(call),
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "skipping damaged call slot");
                    }
                },
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping unreadable call slot");
                }
            }
        }
        calls.sort_by_key(|c| c.id);
        Ok(calls)
    }

    /// Bytes currently consumed by call slots.
    pub fn used_bytes(&self) -> Result<u64, TransportError> {
        let mut total = 0u64;
        let entries = match fs::read_dir(&self.store_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TransportError::Communication(e)),
        };
        for entry in entries {
            let entry = entry.map_err(TransportError::Communication)?;
            total += entry
                .metadata()
                .map_err(TransportError::Communication)?
                .len();
        }
        Ok(total)
    }

    /// Diagnostic check: the header slot must parse and a write-then-read
    /// round-trip through the store directory must return the same bytes.
    pub fn verify(&self) -> Result<(), TransportError> {
        self.read_header()?;
        let path = self.dir.join(".probe");
        let token = format!("probe-{}", std::process::id());
        fs::write(&path, &token).map_err(TransportError::Communication)?;
        let back = fs::read_to_string(&path).map_err(TransportError::Communication)?;
        let _ = fs::remove_file(&path);
        if back != token {
            return Err(TransportError::Corruption(
                "probe round-trip returned different bytes".to_string(),
            ));
        }
        Ok(())
    }

    /// Remove temp files older than `ttl` — leftovers of writers that died
    /// between write and rename. Returns how many were cleared.
    pub fn sweep_tmp(&self, ttl: std::time::Duration) -> Result<u32, TransportError> {
        let mut cleared = 0;
        let entries = match fs::read_dir(&self.store_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TransportError::Communication(e)),
        };
        for entry in entries {
            let entry = entry.map_err(TransportError::Communication)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tmp") {
                continue;
            }
            let stale = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.elapsed().ok())
                .map(|age| age > ttl)
                .unwrap_or(false);
            if stale && fs::remove_file(&path).is_ok() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Destroy the whole pool directory.
    pub fn purge(dir: &Path) -> Result<(), TransportError> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::Communication(e)),
        }
    }

    fn call_path(&self, id: CallId) -> PathBuf {
        self.store_dir.join(format!("call-{id}.json"))
    }

    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), TransportError> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(TransportError::Communication)?;
            file.write_all(bytes).map_err(TransportError::Communication)?;
            file.sync_all().map_err(TransportError::Communication)?;
        }
        fs::rename(&tmp, path).map_err(TransportError::Communication)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
