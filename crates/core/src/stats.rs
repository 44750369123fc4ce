// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded per-tick loop statistics.
//!
//! The supervisor records one [`TickStat`] per loop iteration. The ring is
//! capped so a long-lived daemon holds a constant amount of history.

use std::collections::VecDeque;
use std::time::Duration;

/// Maximum number of ticks retained.
pub const STATS_CAPACITY: usize = 200;

/// Timing of one supervisor tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickStat {
    /// How long user work plus dispatch took.
    pub duration: Duration,
    /// Seconds of the interval left over; negative when the tick overran.
    pub idle: f64,
}

/// Bounded FIFO of tick timings with trimmed-mean reporting.
#[derive(Debug, Default)]
pub struct LoopStats {
    ring: VecDeque<TickStat>,
}

impl LoopStats {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(STATS_CAPACITY),
        }
    }

    /// Record a tick, evicting the oldest entry at capacity.
    pub fn push(&mut self, stat: TickStat) {
        if self.ring.len() == STATS_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(stat);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn last(&self) -> Option<&TickStat> {
        self.ring.back()
    }

    /// Mean tick duration over the most recent `n` samples, after trimming
    /// the top and bottom 5% to shed outliers.
    pub fn mean_duration(&self, n: usize) -> Option<Duration> {
        self.trimmed(n, |s| s.duration.as_secs_f64())
            .map(Duration::from_secs_f64)
    }

    /// Trimmed mean of idle seconds over the most recent `n` samples.
    pub fn mean_idle(&self, n: usize) -> Option<f64> {
        self.trimmed(n, |s| s.idle)
    }

    fn trimmed(&self, n: usize, field: impl Fn(&TickStat) -> f64) -> Option<f64> {
        if self.ring.is_empty() || n == 0 {
            return None;
        }
        let take = n.min(self.ring.len());
        let mut values: Vec<f64> = self.ring.iter().rev().take(take).map(field).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let trim = take * 5 / 100;
        let kept = &values[trim..take - trim];
        if kept.is_empty() {
            return None;
        }
        Some(kept.iter().sum::<f64>() / kept.len() as f64)
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
