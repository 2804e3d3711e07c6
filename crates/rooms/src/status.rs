// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room status: the externally-observable lifecycle state and its listeners.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorInfo;

/// Lifecycle state of the room as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

impl RoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room state transition delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomStateChange {
    pub current: RoomState,
    pub previous: RoomState,
    pub error: Option<ErrorInfo>,
}

type Callback = Arc<dyn Fn(&RoomStateChange) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    once: bool,
    callback: Callback,
}

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

/// Handle for removing a registered status listener.
pub struct StatusSubscription {
    listeners: Arc<Mutex<ListenerSet>>,
    id: u64,
}

impl StatusSubscription {
    /// Remove the listener. Safe to call after the listener already fired.
    pub fn off(&self) {
        self.listeners.lock().entries.retain(|e| e.id != self.id);
    }
}

/// Current room lifecycle state plus listener registries.
///
/// Only the lifecycle manager writes state. Synchronous listeners run in
/// registration order on the writer; a broadcast stream is also published
/// for async observers awaiting the next transition.
pub struct RoomStatus {
    state: Mutex<(RoomState, Option<ErrorInfo>)>,
    listeners: Arc<Mutex<ListenerSet>>,
    change_tx: broadcast::Sender<RoomStateChange>,
}

impl RoomStatus {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new((RoomState::Initialized, None)),
            listeners: Arc::new(Mutex::new(ListenerSet::default())),
            change_tx,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoomState {
        self.state.lock().0
    }

    /// Error attached to the current state, if any.
    pub fn error(&self) -> Option<ErrorInfo> {
        self.state.lock().1.clone()
    }

    /// Subscribe to the broadcast stream of state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomStateChange> {
        self.change_tx.subscribe()
    }

    /// Register a listener invoked on every state change.
    pub fn on_change<F>(&self, listener: F) -> StatusSubscription
    where
        F: Fn(&RoomStateChange) + Send + Sync + 'static,
    {
        self.register(false, listener)
    }

    /// Register a listener that fires once, then removes itself.
    ///
    /// The entry is removed before any listener runs for the triggering
    /// change, so a once-listener can never fire twice.
    pub fn on_change_once<F>(&self, listener: F) -> StatusSubscription
    where
        F: FnOnce(&RoomStateChange) + Send + 'static,
    {
        let slot = Mutex::new(Some(listener));
        self.register(true, move |change| {
            if let Some(f) = slot.lock().take() {
                f(change);
            }
        })
    }

    /// Remove every registered listener.
    pub fn off_all(&self) {
        self.listeners.lock().entries.clear();
    }

    fn register<F>(&self, once: bool, listener: F) -> StatusSubscription
    where
        F: Fn(&RoomStateChange) + Send + Sync + 'static,
    {
        let mut set = self.listeners.lock();
        set.next_id += 1;
        let id = set.next_id;
        set.entries.push(ListenerEntry { id, once, callback: Arc::new(listener) });
        StatusSubscription { listeners: Arc::clone(&self.listeners), id }
    }

    /// Apply a state change and notify listeners.
    ///
    /// No-op transitions (same state, same error) are suppressed.
    pub(crate) fn set_state(&self, state: RoomState, error: Option<ErrorInfo>) {
        let change = {
            let mut current = self.state.lock();
            if current.0 == state && current.1 == error {
                return;
            }
            let change = RoomStateChange { current: state, previous: current.0, error: error.clone() };
            *current = (state, error);
            change
        };

        // Snapshot callbacks and drop once-entries before invoking anything.
        let callbacks: Vec<Callback> = {
            let mut set = self.listeners.lock();
            let snapshot = set.entries.iter().map(|e| Arc::clone(&e.callback)).collect();
            set.entries.retain(|e| !e.once);
            snapshot
        };
        for callback in callbacks {
            callback(&change);
        }

        let _ = self.change_tx.send(change);
    }
}

impl Default for RoomStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
