// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport endpoint: the call-traffic contract between a supervisor and
//! the workers of one pool.
//!
//! Publishing a call writes its payload to the store (for statuses that
//! carry one) and enqueues the fixed envelope on the queue mapped from the
//! status. Consuming is typed per queue: jobs come back as full calls with
//! supersede detection, running acks as bare envelopes, returns as calls
//! whose store slot is released on receipt.

use crate::error::{backoff, ErrorBudget, ErrorClass, Role, TransportError};
use crate::queue::EnvelopeQueue;
use crate::store::CallStore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stoker_core::{Call, CallStatus, Envelope, QueueKind};
use tracing::{debug, info, warn};

/// Attempts made inside [`Transport::put`] before giving up.
const PUT_ATTEMPTS: u32 = 3;

/// Base delay for the publish backoff ladder.
const PUT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Snapshot of transport health for stats dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportState {
    pub pending_messages: u64,
    pub allocated_bytes: u64,
    pub used_bytes: u64,
}

/// One pool's endpoint onto the queues and store.
#[derive(Debug)]
pub struct Transport {
    alias: String,
    dir: PathBuf,
    calls: EnvelopeQueue,
    running: EnvelopeQueue,
    returns: EnvelopeQueue,
    store: CallStore,
    budget: ErrorBudget,
}

impl Transport {
    /// Attach to the pool resources under `dir`.
    ///
    /// Without `recover` any existing resources are destroyed first. With
    /// `recover`, stored calls are returned for rehydration and the queues
    /// are reset (the mediator re-publishes whatever is still live); a
    /// damaged header falls back to a fresh attach.
    pub fn attach(
        dir: &Path,
        alias: &str,
        allocated_bytes: u64,
        role: Role,
        recover: bool,
    ) -> Result<(Self, Vec<Call>), TransportError> {
        let mut recovered = Vec::new();

        if recover && dir.exists() {
            match CallStore::attach(dir) {
                Ok(store) => {
                    recovered = store.live_calls()?;
                    info!(
                        alias,
                        calls = recovered.len(),
                        "recover attach found existing store"
                    );
                }
                Err(e) => {
                    warn!(alias, error = %e, "recover attach found damaged store, purging");
                    CallStore::purge(dir)?;
                    recovered.clear();
                }
            }
            // Queue history is superseded by the re-publish pass
            Self::reset_queues(dir)?;
        } else {
            CallStore::purge(dir)?;
        }

        let store = if dir.join("header.json").exists() && recover {
            CallStore::attach(dir)?
        } else {
            CallStore::create(dir, allocated_bytes)?
        };

        let transport = Self {
            alias: alias.to_string(),
            dir: dir.to_path_buf(),
            calls: EnvelopeQueue::open(dir, QueueKind::Calls)?,
            running: EnvelopeQueue::open(dir, QueueKind::Running)?,
            returns: EnvelopeQueue::open(dir, QueueKind::Returns)?,
            store,
            budget: ErrorBudget::new(role),
        };
        Ok((transport, recovered))
    }

    /// Join resources the supervisor already attached, without touching
    /// them. This is the worker-side attach: a worker must never purge or
    /// reset what it shares with its siblings.
    pub fn join(dir: &Path, alias: &str, role: Role) -> Result<Self, TransportError> {
        let store = CallStore::attach(dir)?;
        Ok(Self {
            alias: alias.to_string(),
            dir: dir.to_path_buf(),
            calls: EnvelopeQueue::open(dir, QueueKind::Calls)?,
            running: EnvelopeQueue::open(dir, QueueKind::Running)?,
            returns: EnvelopeQueue::open(dir, QueueKind::Returns)?,
            store,
            budget: ErrorBudget::new(role),
        })
    }

    fn reset_queues(dir: &Path) -> Result<(), TransportError> {
        for kind in [QueueKind::Calls, QueueKind::Running, QueueKind::Returns] {
            let path = dir.join(kind.file_name());
            for stale in [
                path.clone(),
                path.with_extension("q.cursor"),
                path.with_extension("q.lock"),
            ] {
                match std::fs::remove_file(&stale) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(TransportError::Communication(e)),
                }
            }
        }
        Ok(())
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Publish `call` on the queue mapped from its status.
    ///
    /// `Uncalled` and `Returned` also persist the payload to the store;
    /// `Running` travels as a bare ack. Transient failures are retried up
    /// to three times with exponential backoff, bumping `call.errors` per
    /// failed attempt.
    pub fn put(&mut self, call: &mut Call) -> Result<(), TransportError> {
        let queue = QueueKind::for_status(call.status).ok_or_else(|| {
            TransportError::Catchall(format!(
                "status {} of call {} is not publishable",
                call.status, call.id
            ))
        })?;

        let mut last_err = None;
        for attempt in 0..PUT_ATTEMPTS {
            if attempt > 0 {
                std::thread::sleep(backoff(PUT_BASE_DELAY, attempt - 1));
            }
            match self.put_once(call, queue) {
                Ok(()) => {
                    self.budget.reset(ErrorClass::Communication);
                    return Ok(());
                }
                Err(e) => {
                    call.errors += 1;
                    debug!(
                        alias = %self.alias,
                        call = %call.id,
                        attempt,
                        error = %e,
                        "publish attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| TransportError::Catchall("publish failed with no error".into())))
    }

    fn put_once(&self, call: &mut Call, queue: QueueKind) -> Result<(), TransportError> {
        if matches!(call.status, CallStatus::Uncalled | CallStatus::Returned) {
            self.store.write_call(call)?;
        }
        let envelope = call.header(std::process::id());
        match queue {
            QueueKind::Calls => self.calls.push(&envelope),
            QueueKind::Running => self.running.push(&envelope),
            QueueKind::Returns => self.returns.push(&envelope),
        }
    }

    /// Worker side: take the next job from the inbox.
    ///
    /// Returns the stored call. When the stored publish time no longer
    /// matches the envelope — the supervisor re-queued the call — the call
    /// comes back marked `Cancelled` and must not be executed. Envelopes
    /// whose payload has vanished are skipped.
    pub fn next_job(&mut self, now_micros: u64) -> Result<Option<Call>, TransportError> {
        loop {
            let Some(envelope) = self.calls.pop()? else {
                return Ok(None);
            };
            let Some(mut call) = self.store.read_call(envelope.call_id)? else {
                debug!(
                    alias = %self.alias,
                    call = %envelope.call_id,
                    "inbox envelope without payload, skipping"
                );
                continue;
            };
            if call.times.uncalled != Some(envelope.microtime) {
                // Superseded by a newer publish of the same call id
                if call.transition(CallStatus::Cancelled, now_micros).is_err() {
                    call.status = CallStatus::Cancelled;
                }
                return Ok(Some(call));
            }
            return Ok(Some(call));
        }
    }

    /// Supervisor side: next running ack, envelope only.
    pub fn next_running_ack(&mut self) -> Result<Option<Envelope>, TransportError> {
        self.running.pop()
    }

    /// Supervisor side: next returned call; its store slot is released.
    pub fn next_return(&mut self) -> Result<Option<Call>, TransportError> {
        loop {
            let Some(envelope) = self.returns.pop()? else {
                return Ok(None);
            };
            let Some(call) = self.store.read_call(envelope.call_id)? else {
                debug!(
                    alias = %self.alias,
                    call = %envelope.call_id,
                    "return envelope without payload, skipping"
                );
                continue;
            };
            self.store.remove_call(envelope.call_id)?;
            return Ok(Some(call));
        }
    }

    /// Pending messages and byte accounting.
    pub fn state(&self) -> Result<TransportState, TransportError> {
        let pending =
            self.calls.pending()? + self.running.pending()? + self.returns.pending()?;
        Ok(TransportState {
            pending_messages: pending,
            allocated_bytes: self.store.capacity(),
            used_bytes: self.store.used_bytes()?,
        })
    }

    /// Destroy queues and store.
    pub fn purge(&self) -> Result<(), TransportError> {
        CallStore::purge(&self.dir)
    }

    /// Release store slots of calls that are inactive and already
    /// collected locally. Returns how many slots were dropped.
    pub fn gc<'a>(
        &self,
        calls: impl IntoIterator<Item = &'a Call>,
    ) -> Result<u32, TransportError> {
        let mut removed = 0;
        for call in calls {
            if !call.is_active() && call.collected {
                self.store.remove_call(call.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Worker-side housekeeping: clear temp files abandoned by writers
    /// that died mid-rename. Never touches live entries.
    pub fn sweep(&self) -> Result<u32, TransportError> {
        self.store.sweep_tmp(Duration::from_secs(60))
    }

    /// Corruption response: verify with a probe round-trip; on failure
    /// snapshot all non-timeout calls, tear the store down, re-create it
    /// and re-publish. Unconsumed `Uncalled`/`Called` entries re-enter the
    /// inbox as retries (exhausted ones are cancelled).
    ///
    /// Returns the ids that were re-queued.
    pub fn rebuild(&mut self, now_micros: u64) -> Result<Vec<stoker_core::CallId>, TransportError> {
        if self.store.verify().is_ok() {
            debug!(alias = %self.alias, "store probe passed, no rebuild needed");
            return Ok(Vec::new());
        }

        warn!(alias = %self.alias, "store probe failed, rebuilding pool resources");
        let snapshot: Vec<Call> = self
            .store
            .live_calls()?
            .into_iter()
            .filter(|c| c.status != CallStatus::Timeout)
            .collect();
        let capacity = self.store.capacity();

        CallStore::purge(&self.dir)?;
        self.store = CallStore::create(&self.dir, capacity)?;
        self.calls = EnvelopeQueue::open(&self.dir, QueueKind::Calls)?;
        self.running = EnvelopeQueue::open(&self.dir, QueueKind::Running)?;
        self.returns = EnvelopeQueue::open(&self.dir, QueueKind::Returns)?;

        let mut requeued = Vec::new();
        for mut call in snapshot {
            match call.status {
                CallStatus::Uncalled | CallStatus::Called => match call.retry(now_micros) {
                    Ok(_) => {
                        self.put(&mut call)?;
                        requeued.push(call.id);
                    }
                    Err(e) => {
                        warn!(alias = %self.alias, call = %call.id, error = %e, "dropping call during rebuild");
                    }
                },
                _ => {
                    // Keep the record visible without re-dispatching it
                    self.store.write_call(&mut call)?;
                }
            }
        }
        info!(alias = %self.alias, requeued = requeued.len(), "store rebuilt");
        Ok(requeued)
    }

    /// Record a failure against the endpoint's budget. Returns `false`
    /// once the class threshold is crossed — fatal for this role.
    pub fn absorb(&mut self, error: &TransportError) -> bool {
        self.budget.record(error.class())
    }

    /// Failure count for a class, for diagnostics.
    pub fn fault_count(&self, class: ErrorClass) -> u32 {
        self.budget.count(class)
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
