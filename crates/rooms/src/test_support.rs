// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted channels and fake contributors.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::channel::{Channel, ChannelOp, ChannelState, ChannelStateChange};
use crate::contributor::Contributor;
use crate::error::ErrorInfo;
use crate::status::{RoomStateChange, RoomStatus};

/// Scripted outcome for one `attach()` call on a [`ScriptedChannel`].
#[derive(Debug, Clone)]
pub struct AttachOutcome {
    pub result: Result<(), ErrorInfo>,
    /// Channel state after the call settles.
    pub end_state: ChannelState,
}

impl AttachOutcome {
    pub fn ok() -> Self {
        Self { result: Ok(()), end_state: ChannelState::Attached }
    }

    /// A rejected attach that leaves the channel in `end_state`.
    pub fn fail(end_state: ChannelState, error: ErrorInfo) -> Self {
        Self { result: Err(error), end_state }
    }
}

/// A fake transport channel driven entirely by the test: attach/detach
/// outcomes are scripted, state changes are emitted manually, and calls are
/// counted.
pub struct ScriptedChannel {
    state: Mutex<ChannelState>,
    error: Mutex<Option<ErrorInfo>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ChannelStateChange>>>,
    attach_script: Mutex<VecDeque<AttachOutcome>>,
    detach_script: Mutex<VecDeque<Result<(), ErrorInfo>>>,
    attach_gates: Mutex<VecDeque<Arc<Notify>>>,
    detach_gates: Mutex<VecDeque<Arc<Notify>>>,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
    /// `resumed` flag emitted on successful scripted attaches.
    resume_on_attach: AtomicBool,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Initialized),
            error: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            attach_script: Mutex::new(VecDeque::new()),
            detach_script: Mutex::new(VecDeque::new()),
            attach_gates: Mutex::new(VecDeque::new()),
            detach_gates: Mutex::new(VecDeque::new()),
            attach_calls: AtomicUsize::new(0),
            detach_calls: AtomicUsize::new(0),
            resume_on_attach: AtomicBool::new(true),
        }
    }

    /// Queue an outcome for the next unscripted `attach()` call. Calls with
    /// an empty queue succeed.
    pub fn push_attach(&self, outcome: AttachOutcome) {
        self.attach_script.lock().push_back(outcome);
    }

    /// Queue an outcome for the next `detach()` call. Calls with an empty
    /// queue succeed.
    pub fn push_detach(&self, result: Result<(), ErrorInfo>) {
        self.detach_script.lock().push_back(result);
    }

    /// Gate the next `attach()` call: it will not settle until the returned
    /// handle is notified. Used to hold an orchestration in flight.
    pub fn gate_next_attach(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.attach_gates.lock().push_back(Arc::clone(&gate));
        gate
    }

    /// Gate the next `detach()` call, mirroring [`gate_next_attach`].
    ///
    /// [`gate_next_attach`]: Self::gate_next_attach
    pub fn gate_next_detach(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.detach_gates.lock().push_back(Arc::clone(&gate));
        gate
    }

    /// Set the `resumed` flag emitted by successful attaches.
    pub fn set_resume_on_attach(&self, resumed: bool) {
        self.resume_on_attach.store(resumed, Ordering::SeqCst);
    }

    /// Set the channel state without notifying listeners.
    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    pub fn set_error(&self, error: Option<ErrorInfo>) {
        *self.error.lock() = error;
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detach_calls(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }

    /// Emit a state change to every subscriber, updating the channel state
    /// and error to match.
    pub fn emit(&self, change: ChannelStateChange) {
        *self.state.lock() = change.current;
        if change.reason.is_some() {
            *self.error.lock() = change.reason.clone();
        }
        self.listeners.lock().retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Emit a transition from the current state into `to`.
    pub fn transition(&self, to: ChannelState, resumed: bool, reason: Option<ErrorInfo>) {
        let previous = *self.state.lock();
        self.emit(ChannelStateChange { current: to, previous, resumed, reason });
    }

    /// Emit a same-state `Attached` update (a resume re-notification).
    pub fn update_attached(&self, resumed: bool, reason: Option<ErrorInfo>) {
        self.emit(ChannelStateChange {
            current: ChannelState::Attached,
            previous: ChannelState::Attached,
            resumed,
            reason,
        });
    }
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for ScriptedChannel {
    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn error_reason(&self) -> Option<ErrorInfo> {
        self.error.lock().clone()
    }

    fn attach(&self) -> ChannelOp<'_> {
        Box::pin(async move {
            self.attach_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.attach_gates.lock().pop_front();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let outcome =
                self.attach_script.lock().pop_front().unwrap_or_else(AttachOutcome::ok);
            match outcome.result {
                Ok(()) => {
                    if *self.state.lock() != ChannelState::Attached {
                        let resumed = self.resume_on_attach.load(Ordering::SeqCst);
                        self.transition(ChannelState::Attached, resumed, None);
                    }
                    Ok(())
                }
                Err(err) => {
                    self.transition(outcome.end_state, false, Some(err.clone()));
                    Err(err)
                }
            }
        })
    }

    fn detach(&self) -> ChannelOp<'_> {
        Box::pin(async move {
            self.detach_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.detach_gates.lock().pop_front();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let result = self.detach_script.lock().pop_front().unwrap_or(Ok(()));
            match result {
                Ok(()) => {
                    if *self.state.lock() != ChannelState::Detached {
                        self.transition(ChannelState::Detached, false, None);
                    }
                    Ok(())
                }
                Err(err) => {
                    *self.error.lock() = Some(err.clone());
                    Err(err)
                }
            }
        })
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelStateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }
}

/// A contributor over a [`ScriptedChannel`] that records discontinuity
/// notifications.
pub struct FakeContributor {
    channel: Arc<ScriptedChannel>,
    feature: &'static str,
    attach_code: u32,
    detach_code: u32,
    discontinuities: Mutex<Vec<Option<ErrorInfo>>>,
}

impl FakeContributor {
    pub fn new(feature: &'static str) -> Arc<Self> {
        Self::with_codes(feature, 102_001, 102_050)
    }

    pub fn with_codes(feature: &'static str, attach_code: u32, detach_code: u32) -> Arc<Self> {
        Arc::new(Self {
            channel: Arc::new(ScriptedChannel::new()),
            feature,
            attach_code,
            detach_code,
            discontinuities: Mutex::new(Vec::new()),
        })
    }

    /// The scripted channel backing this contributor.
    pub fn scripted(&self) -> &ScriptedChannel {
        &self.channel
    }

    /// Every `discontinuity_detected` call received so far.
    pub fn discontinuities(&self) -> Vec<Option<ErrorInfo>> {
        self.discontinuities.lock().clone()
    }
}

impl Contributor for FakeContributor {
    fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    fn feature(&self) -> &'static str {
        self.feature
    }

    fn attachment_error_code(&self) -> u32 {
        self.attach_code
    }

    fn detachment_error_code(&self) -> u32 {
        self.detach_code
    }

    fn discontinuity_detected(&self, reason: Option<ErrorInfo>) {
        self.discontinuities.lock().push(reason);
    }
}

/// Record every room transition into a shared log.
pub fn record_transitions(status: &RoomStatus) -> Arc<Mutex<Vec<RoomStateChange>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _ = status.on_change(move |change| sink.lock().push(change.clone()));
    log
}

/// Yield to the runtime so the monitor loop drains its queue.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` between yields until it holds or the budget runs out.
/// Never advances the clock, so paused-time tests stay deterministic.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..4_096 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}
