// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-contributor grace timers that keep brief channel detachments from
//! propagating to the room lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TimerSet {
    next_generation: u64,
    entries: HashMap<usize, ArmedTimer>,
}

/// Grace timers keyed by contributor index.
///
/// Arming starts a sleep task; expiry is reported through the `on_expire`
/// callback together with the arming generation, so a consumer can tell a
/// stale expiry (timer re-armed since) from a live one via [`take`].
///
/// [`take`]: TransientDetachTimers::take
pub struct TransientDetachTimers {
    timeout: Duration,
    parent: CancellationToken,
    armed: Mutex<TimerSet>,
}

impl TransientDetachTimers {
    /// `parent` bounds every timer's lifetime: cancelling it disarms all.
    pub fn new(timeout: Duration, parent: CancellationToken) -> Self {
        Self { timeout, parent, armed: Mutex::new(TimerSet::default()) }
    }

    /// Arm a timer for the contributor, replacing any existing one.
    ///
    /// Returns the arming generation. When the grace period elapses
    /// uncancelled, `on_expire` is invoked with that generation.
    pub fn arm<F>(&self, contributor: usize, on_expire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let cancel = self.parent.child_token();
        let generation = {
            let mut set = self.armed.lock();
            set.next_generation += 1;
            let generation = set.next_generation;
            if let Some(previous) =
                set.entries.insert(contributor, ArmedTimer { generation, cancel: cancel.clone() })
            {
                previous.cancel.cancel();
            }
            generation
        };

        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => on_expire(generation),
            }
        });
        generation
    }

    /// Cancel the contributor's timer, if armed.
    pub fn disarm(&self, contributor: usize) {
        if let Some(timer) = self.armed.lock().entries.remove(&contributor) {
            timer.cancel.cancel();
        }
    }

    /// Consume an armed entry at expiry.
    ///
    /// Returns `false` when the timer was disarmed or re-armed after this
    /// expiry fired, in which case the expiry must be ignored.
    pub fn take(&self, contributor: usize, generation: u64) -> bool {
        let mut set = self.armed.lock();
        match set.entries.get(&contributor) {
            Some(timer) if timer.generation == generation => {
                set.entries.remove(&contributor);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, contributor: usize) -> bool {
        self.armed.lock().entries.contains_key(&contributor)
    }

    /// Cancel every armed timer.
    pub fn clear_all(&self) {
        let mut set = self.armed.lock();
        for (_, timer) in set.entries.drain() {
            timer.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[path = "transient_tests.rs"]
mod tests;
