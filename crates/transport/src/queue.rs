// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSONL envelope queue with a persisted consumer cursor.
//!
//! Each entry is a single line of JSON holding one [`Envelope`]. The cursor
//! sidecar records the byte offset of the next unconsumed line, so any
//! process attached to the pool sees the same consumption point. Pushes and
//! pops are serialized by an exclusive advisory lock, which is what gives
//! the queue its at-most-once pop semantics across processes.

use crate::error::TransportError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use stoker_core::{Envelope, QueueKind};
use tracing::warn;

/// Once fully consumed past this size, the queue file is truncated.
const COMPACT_THRESHOLD: u64 = 64 * 1024;

/// One typed envelope queue backed by three files: the JSONL log, its
/// cursor, and its lock.
#[derive(Debug)]
pub struct EnvelopeQueue {
    kind: QueueKind,
    path: PathBuf,
    cursor_path: PathBuf,
    lock_path: PathBuf,
}

impl EnvelopeQueue {
    /// Open (creating if needed) the queue for `kind` under `dir`.
    pub fn open(dir: &Path, kind: QueueKind) -> Result<Self, TransportError> {
        let path = dir.join(kind.file_name());
        let queue = Self {
            kind,
            cursor_path: path.with_extension("q.cursor"),
            lock_path: path.with_extension("q.lock"),
            path,
        };
        // Touch the log so open never races with the first push
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&queue.path)
            .map_err(TransportError::Communication)?;
        Ok(queue)
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Append one envelope.
    pub fn push(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let _lock = self.lock()?;
        let mut line = serde_json::to_vec(envelope)
            .map_err(|e| TransportError::Catchall(format!("encode envelope: {e}")))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(TransportError::Communication)?;
        file.write_all(&line).map_err(TransportError::Communication)?;
        file.flush().map_err(TransportError::Communication)
    }

    /// Remove and return the next envelope, or `None` when the queue is
    /// drained. An unparseable line is skipped and reported as corruption.
    pub fn pop(&self) -> Result<Option<Envelope>, TransportError> {
        let _lock = self.lock()?;
        let mut cursor = self.read_cursor()?;

        let file = File::open(&self.path).map_err(TransportError::Communication)?;
        let len = file
            .metadata()
            .map_err(TransportError::Communication)?
            .len();

        if cursor >= len {
            self.compact_if_due(cursor, len)?;
            return Ok(None);
        }

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(cursor))
            .map_err(TransportError::Communication)?;

        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .map_err(TransportError::Communication)?;
            if bytes_read == 0 {
                self.write_cursor(cursor)?;
                return Ok(None);
            }

            let next = cursor + bytes_read as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                cursor = next;
                continue;
            }

            return match serde_json::from_str::<Envelope>(trimmed) {
                Ok(envelope) => {
                    self.write_cursor(next)?;
                    Ok(Some(envelope))
                }
                Err(e) => {
                    // Advance past the damaged line so the queue cannot wedge
                    warn!(queue = %self.kind, offset = cursor, error = %e, "corrupt envelope skipped");
                    self.write_cursor(next)?;
                    Err(TransportError::Corruption(format!(
                        "envelope at offset {cursor} in {}: {e}",
                        self.kind
                    )))
                }
            };
        }
    }

    /// Number of unconsumed envelopes.
    pub fn pending(&self) -> Result<u64, TransportError> {
        let _lock = self.lock()?;
        let cursor = self.read_cursor()?;
        let file = File::open(&self.path).map_err(TransportError::Communication)?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(cursor))
            .map_err(TransportError::Communication)?;

        let mut count = 0u64;
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if !line.trim().is_empty() {
                        count += 1;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => break,
                Err(e) => return Err(TransportError::Communication(e)),
            }
        }
        Ok(count)
    }

    fn compact_if_due(&self, cursor: u64, len: u64) -> Result<(), TransportError> {
        if cursor < len || len < COMPACT_THRESHOLD {
            return Ok(());
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(TransportError::Communication)?;
        file.set_len(0).map_err(TransportError::Communication)?;
        self.write_cursor(0)
    }

    fn read_cursor(&self) -> Result<u64, TransportError> {
        let mut buf = String::new();
        match File::open(&self.cursor_path) {
            Ok(mut f) => {
                f.read_to_string(&mut buf)
                    .map_err(TransportError::Communication)?;
                Ok(buf.trim().parse().unwrap_or(0))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(TransportError::Communication(e)),
        }
    }

    fn write_cursor(&self, offset: u64) -> Result<(), TransportError> {
        std::fs::write(&self.cursor_path, offset.to_string())
            .map_err(TransportError::Communication)
    }

    // Lock released when the returned handle drops.
    fn lock(&self) -> Result<File, TransportError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(TransportError::Communication)?;
        file.lock_exclusive().map_err(TransportError::Communication)?;
        Ok(file)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
