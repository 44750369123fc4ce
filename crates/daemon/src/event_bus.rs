// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Intra-process callback registry keyed by event kind.
//!
//! `on` appends a callback and returns a handle naming its slot; `off`
//! removes exactly that callback. Dispatch fans out to every live callback
//! of a kind, or to a single slot when addressed directly.

use std::collections::HashMap;
use stoker_core::{EventKind, EventPayload};

/// A registered callback.
pub type Callback = Box<dyn Fn(&EventPayload) + Send>;

/// Handle returned by [`EventBus::on`], consumed by [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHandle {
    pub kind: EventKind,
    pub slot: usize,
}

/// Callback registry for supervisor events.
#[derive(Default)]
pub struct EventBus {
    slots: HashMap<EventKind, Vec<Option<Callback>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind`.
    pub fn on(&mut self, kind: EventKind, callback: impl Fn(&EventPayload) + Send + 'static) -> CallbackHandle {
        let list = self.slots.entry(kind).or_default();
        list.push(Some(Box::new(callback)));
        CallbackHandle {
            kind,
            slot: list.len() - 1,
        }
    }

    /// Remove exactly the callback behind `handle`.
    ///
    /// Returns `false` when the slot was already empty. Slots are never
    /// reused, so a stale handle cannot remove a later registration.
    pub fn off(&mut self, handle: CallbackHandle) -> bool {
        self.slots
            .get_mut(&handle.kind)
            .and_then(|list| list.get_mut(handle.slot))
            .map(|slot| slot.take().is_some())
            .unwrap_or(false)
    }

    /// Fan `payload` out to every callback registered for `kind`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, kind: EventKind, payload: &EventPayload) -> usize {
        let Some(list) = self.slots.get(&kind) else {
            return 0;
        };
        let mut invoked = 0;
        for callback in list.iter().flatten() {
            callback(payload);
            invoked += 1;
        }
        invoked
    }

    /// Invoke exactly the callback behind `handle`, if still registered.
    pub fn dispatch_slot(&self, handle: CallbackHandle, payload: &EventPayload) -> bool {
        match self
            .slots
            .get(&handle.kind)
            .and_then(|list| list.get(handle.slot))
        {
            Some(Some(callback)) => {
                callback(payload);
                true
            }
            _ => false,
        }
    }

    /// Number of live callbacks for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.slots
            .get(&kind)
            .map(|list| list.iter().flatten().count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
