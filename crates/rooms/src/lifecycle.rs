// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The room lifecycle orchestrator.
//!
//! Presents N independently-failing transport channels as one coherent room
//! lifecycle. All contributor state changes funnel into a single monitor
//! loop; long-running work (wind-downs, recovery cycles) is spawned off it
//! so event handling never stalls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{ChannelState, ChannelStateChange};
use crate::config::LifecycleConfig;
use crate::contributor::Contributor;
use crate::discontinuity::DiscontinuityTracker;
use crate::error::{ErrorCode, ErrorInfo};
use crate::status::{RoomState, RoomStateChange, RoomStatus};
use crate::transient::TransientDetachTimers;

/// Events multiplexed into the monitor loop.
enum MonitorEvent {
    Channel { contributor: usize, change: ChannelStateChange },
    DetachTimerElapsed { contributor: usize, generation: u64 },
}

/// Outcome of a failed attach orchestration.
struct AttachFailure {
    error: ErrorInfo,
    /// Index of the contributor whose attach failed; `None` when the
    /// orchestration aborted on an internal error instead.
    failed: Option<usize>,
}

/// Coordinates the lifecycle of one room over its contributors' channels.
///
/// Construction spawns the monitor loop; [`close`](Self::close) (or drop)
/// tears it down along with any armed timers and in-flight recovery cycles.
pub struct RoomLifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    /// Fixed at construction; determines attach and detach iteration order.
    contributors: Vec<Arc<dyn Contributor>>,
    status: RoomStatus,
    /// Serializes attach/detach orchestration bodies. Fast paths run before
    /// acquisition.
    op_lock: Mutex<()>,
    timers: TransientDetachTimers,
    discontinuity: DiscontinuityTracker,
    /// While set, contributor events are observed for bookkeeping only and
    /// never drive room state. Set for the whole of every orchestration and
    /// recovery cycle, and permanently once the room fails.
    ignore_events: AtomicBool,
    /// Latched per contributor once it has attached as part of an
    /// orchestration that reached room `Attached`. Gates discontinuity
    /// recording so a fresh first attach never reads as a stream gap.
    first_attach_done: Vec<AtomicBool>,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    shutdown: CancellationToken,
}

impl RoomLifecycleManager {
    /// Build the manager and start monitoring the contributors' channels.
    pub fn new(contributors: Vec<Arc<dyn Contributor>>, config: LifecycleConfig) -> Self {
        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let first_attach_done = contributors.iter().map(|_| AtomicBool::new(false)).collect();
        let inner = Arc::new(Inner {
            timers: TransientDetachTimers::new(
                config.transient_detach_timeout(),
                shutdown.clone(),
            ),
            contributors,
            status: RoomStatus::new(),
            op_lock: Mutex::new(()),
            discontinuity: DiscontinuityTracker::new(),
            ignore_events: AtomicBool::new(false),
            first_attach_done,
            events_tx,
            shutdown,
        });

        // Fan every channel's state changes into the single monitor queue so
        // events are classified one at a time, in arrival order.
        for (idx, contributor) in inner.contributors.iter().enumerate() {
            let mut changes = contributor.channel().subscribe();
            let tx = inner.events_tx.clone();
            let cancel = inner.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        change = changes.recv() => match change {
                            Some(change) => {
                                let _ = tx.send(MonitorEvent::Channel { contributor: idx, change });
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        tokio::spawn(monitor_loop(Arc::clone(&inner), events_rx));
        Self { inner }
    }

    /// The room's status: current state, error, and listener registration.
    pub fn status(&self) -> &RoomStatus {
        &self.inner.status
    }

    /// Current room lifecycle state.
    pub fn state(&self) -> RoomState {
        self.inner.status.state()
    }

    /// Attach the room: drive every contributor's channel to `Attached`.
    ///
    /// Resolves immediately when already attached; while an attach or
    /// detach is in flight, settles with the outcome of the next room
    /// transition. A failure carries the offending feature's attachment
    /// code with the transport error as cause.
    pub async fn attach(&self) -> Result<(), ErrorInfo> {
        self.inner.attach().await
    }

    /// Detach the room: drive every contributor's channel to `Detached`.
    ///
    /// Rejects with `RoomInFailedState` once the room has failed.
    pub async fn detach(&self) -> Result<(), ErrorInfo> {
        self.inner.detach().await
    }

    /// Stop monitoring: cancels the monitor loop, armed timers, and any
    /// in-flight recovery cycle. The room status is left as-is.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.timers.clear_all();
    }
}

impl Drop for RoomLifecycleManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn monitor_loop(inner: Arc<Inner>, mut events_rx: mpsc::UnboundedReceiver<MonitorEvent>) {
    loop {
        let event = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = events_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            MonitorEvent::Channel { contributor, change } => {
                inner.handle_channel_event(contributor, &change);
            }
            MonitorEvent::DetachTimerElapsed { contributor, generation } => {
                inner.handle_timer_elapsed(contributor, generation);
            }
        }
    }
}

/// Whether a channel event signals a message-stream discontinuity: an entry
/// into `Attached` without a stream resume, or an attached-state update
/// carrying a failed resume or an error.
fn is_discontinuity(change: &ChannelStateChange) -> bool {
    if change.current != ChannelState::Attached {
        return false;
    }
    if change.is_update() {
        !change.resumed || change.reason.is_some()
    } else {
        !change.resumed
    }
}

impl Inner {
    // -- Public operation bodies ------------------------------------------

    async fn attach(self: &Arc<Self>) -> Result<(), ErrorInfo> {
        // Fast paths, checked before taking the operation lock. Subscribing
        // first guarantees a transition between the check and the wait is
        // still observed.
        let changes = self.status.subscribe();
        match self.status.state() {
            RoomState::Attached => return Ok(()),
            RoomState::Attaching | RoomState::Detaching => {
                return next_outcome(changes, RoomState::Attached).await;
            }
            RoomState::Failed => {
                return Err(ErrorInfo::new(
                    ErrorCode::RoomInFailedState,
                    "cannot attach room, room is in a failed state",
                ));
            }
            _ => {}
        }
        drop(changes);

        self.run_attach().await.map_err(|failure| failure.error)
    }

    async fn detach(self: &Arc<Self>) -> Result<(), ErrorInfo> {
        let changes = self.status.subscribe();
        match self.status.state() {
            RoomState::Detached => return Ok(()),
            RoomState::Failed => {
                return Err(ErrorInfo::new(
                    ErrorCode::RoomInFailedState,
                    "cannot detach room, room is in a failed state",
                ));
            }
            RoomState::Detaching => {
                return next_outcome(changes, RoomState::Detached).await;
            }
            _ => {}
        }
        drop(changes);

        self.run_detach().await
    }

    // -- Orchestrations ---------------------------------------------------

    /// Attach every contributor in order, rolling back on the first failure.
    async fn run_attach(self: &Arc<Self>) -> Result<(), AttachFailure> {
        let _guard = self.op_lock.lock().await;
        // A racing orchestration may have settled the room while this one
        // waited on the lock.
        match self.status.state() {
            RoomState::Attached => return Ok(()),
            RoomState::Failed => {
                return Err(AttachFailure {
                    failed: None,
                    error: ErrorInfo::new(
                        ErrorCode::RoomInFailedState,
                        "cannot attach room, room is in a failed state",
                    ),
                });
            }
            _ => {}
        }
        self.ignore_events.store(true, Ordering::Release);
        self.publish(RoomState::Attaching, None);

        let mut outcome: Result<(), AttachFailure> = Ok(());
        let mut result_state = RoomState::Attached;
        let mut result_error = None;

        for (idx, contributor) in self.contributors.iter().enumerate() {
            let err = match contributor.channel().attach().await {
                Ok(()) => continue,
                Err(err) => err,
            };

            let channel_state = contributor.channel().state();
            warn!(
                feature = contributor.feature(),
                state = %channel_state,
                err = %err,
                "contributor attach failed, rolling back"
            );
            let surfaced = ErrorInfo::from_code(
                contributor.attachment_error_code(),
                500,
                format!("failed to attach {} feature", contributor.feature()),
            )
            .caused_by(err);

            result_state = match channel_state {
                ChannelState::Suspended => {
                    // Wind the suspended channel down so the room lands on a
                    // consistent set of detached channels.
                    if let Err(detach_err) = contributor.channel().detach().await {
                        debug!(
                            feature = contributor.feature(),
                            err = %detach_err,
                            "wind-down of suspended channel failed"
                        );
                    }
                    RoomState::Detached
                }
                ChannelState::Detached => RoomState::Detached,
                ChannelState::Failed => RoomState::Failed,
                other => {
                    // Transport contract violation: attach() settled without
                    // leaving the channel in a settled state.
                    self.ignore_events.store(false, Ordering::Release);
                    return Err(AttachFailure {
                        failed: None,
                        error: ErrorInfo::new(
                            ErrorCode::InternalError,
                            format!("unexpected channel state {other} after failed attach"),
                        ),
                    });
                }
            };

            // Roll back the contributors that attached before the failure.
            // Rollback errors are collected, never surfaced; the original
            // failure is the one callers see.
            for (other_idx, other) in self.contributors.iter().enumerate() {
                if other_idx == idx {
                    continue;
                }
                if matches!(
                    other.channel().state(),
                    ChannelState::Detached
                        | ChannelState::Initialized
                        | ChannelState::Suspended
                        | ChannelState::Failed
                ) {
                    continue;
                }
                if let Err(detach_err) = other.channel().detach().await {
                    warn!(
                        feature = other.feature(),
                        err = %detach_err,
                        "rollback detach failed, failing the room"
                    );
                    result_state = RoomState::Failed;
                }
            }

            result_error = Some(surfaced.clone());
            outcome = Err(AttachFailure { failed: Some(idx), error: surfaced });
            break;
        }

        self.publish(result_state, result_error);
        if result_state != RoomState::Failed {
            self.ignore_events.store(false, Ordering::Release);
        }

        if result_state == RoomState::Attached {
            for flag in &self.first_attach_done {
                flag.store(true, Ordering::Release);
            }
            self.flush_discontinuities();
        } else {
            // First-attach semantics: contributors that have never been part
            // of an attached room do not accumulate discontinuities.
            for (idx, flag) in self.first_attach_done.iter().enumerate() {
                if !flag.load(Ordering::Acquire) {
                    self.discontinuity.clear(idx);
                }
            }
        }
        outcome
    }

    /// Detach every contributor in order, surfacing the last error seen.
    async fn run_detach(self: &Arc<Self>) -> Result<(), ErrorInfo> {
        let _guard = self.op_lock.lock().await;
        match self.status.state() {
            RoomState::Detached => return Ok(()),
            RoomState::Failed => {
                return Err(ErrorInfo::new(
                    ErrorCode::RoomInFailedState,
                    "cannot detach room, room is in a failed state",
                ));
            }
            _ => {}
        }
        self.ignore_events.store(true, Ordering::Release);
        self.publish(RoomState::Detaching, None);

        let mut last_error = None;
        for contributor in &self.contributors {
            if let Err(err) = contributor.channel().detach().await {
                warn!(feature = contributor.feature(), err = %err, "contributor detach failed");
                last_error = Some(
                    ErrorInfo::from_code(
                        contributor.detachment_error_code(),
                        500,
                        format!("failed to detach {} feature", contributor.feature()),
                    )
                    .caused_by(err),
                );
            }
        }

        match last_error {
            Some(error) => {
                // Failed is terminal, so the event latch stays set.
                self.publish(RoomState::Failed, Some(error.clone()));
                Err(error)
            }
            None => {
                self.publish(RoomState::Detached, None);
                self.ignore_events.store(false, Ordering::Release);
                Ok(())
            }
        }
    }

    // -- Event classification ---------------------------------------------

    fn handle_channel_event(self: &Arc<Self>, idx: usize, change: &ChannelStateChange) {
        let contributor = &self.contributors[idx];
        debug!(
            feature = contributor.feature(),
            current = %change.current,
            previous = %change.previous,
            resumed = change.resumed,
            "channel state change"
        );

        if self.ignore_events.load(Ordering::Acquire) {
            // Bookkeeping only: stale timer clearing and discontinuity
            // latching. Room state is owned by whoever set the latch.
            if change.current == ChannelState::Attached {
                self.timers.disarm(idx);
            }
            if is_discontinuity(change) {
                self.record_discontinuity(idx, change.reason.clone());
            }
            return;
        }

        match change.current {
            ChannelState::Failed => self.on_channel_failed(idx, change),
            ChannelState::Attached if self.timers.is_armed(idx) => {
                debug!(feature = contributor.feature(), "transient detachment absorbed");
                self.timers.disarm(idx);
                if !change.resumed {
                    self.record_discontinuity(idx, change.reason.clone());
                }
            }
            ChannelState::Suspended => {
                self.on_non_transient_detach(idx, RoomState::Suspended, change.reason.clone());
            }
            ChannelState::Detached if !self.timers.is_armed(idx) => {
                let tx = self.events_tx.clone();
                let generation = self.timers.arm(idx, move |generation| {
                    let _ = tx.send(MonitorEvent::DetachTimerElapsed { contributor: idx, generation });
                });
                debug!(
                    feature = contributor.feature(),
                    generation,
                    "channel detached, grace period started"
                );
            }
            _ => {
                if is_discontinuity(change) {
                    self.record_discontinuity(idx, change.reason.clone());
                }
            }
        }
    }

    fn handle_timer_elapsed(self: &Arc<Self>, idx: usize, generation: u64) {
        if !self.timers.take(idx, generation) {
            return; // disarmed or re-armed since this expiry fired
        }
        if self.ignore_events.load(Ordering::Acquire) {
            return; // an orchestration owns the lifecycle; the timer is stale
        }

        let contributor = &self.contributors[idx];
        warn!(feature = contributor.feature(), "detachment grace period expired");
        let room_state = match contributor.channel().state() {
            ChannelState::Suspended => RoomState::Suspended,
            _ => RoomState::Detached,
        };
        self.on_non_transient_detach(idx, room_state, None);
    }

    /// A channel failed: the room fails with it, terminally.
    fn on_channel_failed(self: &Arc<Self>, idx: usize, change: &ChannelStateChange) {
        let contributor = &self.contributors[idx];
        warn!(feature = contributor.feature(), "channel failed, room lifecycle is terminal");

        self.ignore_events.store(true, Ordering::Release);
        let error = change
            .reason
            .clone()
            .or_else(|| contributor.channel().error_reason())
            .unwrap_or_else(|| {
                ErrorInfo::from_code(
                    contributor.attachment_error_code(),
                    500,
                    format!("{} feature channel failed", contributor.feature()),
                )
            });
        self.publish(RoomState::Failed, Some(error));

        // Wind down the rest; the room has already failed, so errors are
        // logged and dropped.
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.detach_others(idx).await;
        });
    }

    /// A channel left `Attached` for real (suspension, or a detachment that
    /// outlived the grace period): mirror its state onto the room and start
    /// a recovery cycle.
    fn on_non_transient_detach(
        self: &Arc<Self>,
        idx: usize,
        room_state: RoomState,
        reason: Option<ErrorInfo>,
    ) {
        let contributor = &self.contributors[idx];
        warn!(
            feature = contributor.feature(),
            state = %room_state,
            "non-transient detachment, entering recovery"
        );

        self.ignore_events.store(true, Ordering::Release);
        let error = reason.or_else(|| contributor.channel().error_reason());
        self.publish(room_state, error);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.recover(idx).await;
        });
    }

    // -- Recovery ---------------------------------------------------------

    /// Recovery cycle: wind down the healthy channels, wait for the
    /// offending one to settle, then re-attach the room. Repeats against
    /// the latest failed contributor until the room is `Attached`,
    /// `Failed`, or the manager is closed.
    async fn recover(self: &Arc<Self>, mut failed_idx: usize) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            self.ignore_events.store(true, Ordering::Release);
            self.detach_others(failed_idx).await;

            match self.wait_channel_settled(failed_idx).await {
                Some(ChannelState::Attached) => {}
                Some(_) => {
                    let contributor = &self.contributors[failed_idx];
                    let error = contributor.channel().error_reason().unwrap_or_else(|| {
                        ErrorInfo::from_code(
                            contributor.attachment_error_code(),
                            500,
                            format!("{} feature channel failed during recovery", contributor.feature()),
                        )
                    });
                    self.publish(RoomState::Failed, Some(error));
                    return;
                }
                None => return, // closed
            }

            if self.shutdown.is_cancelled() {
                return;
            }
            if self.status.state() == RoomState::Attached {
                return; // a concurrent attach already recovered the room
            }

            match self.run_attach().await {
                Ok(()) => {
                    debug!("room recovered");
                    return;
                }
                Err(failure) => {
                    if self.status.state() == RoomState::Failed {
                        return;
                    }
                    match failure.failed {
                        Some(idx) => {
                            debug!(err = %failure.error, "recovery attach failed, retrying");
                            failed_idx = idx;
                        }
                        None => {
                            warn!(err = %failure.error, "recovery attach aborted");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Wait for the contributor's channel to settle in `Attached` or
    /// `Failed`. Returns `None` when the manager is closed first.
    async fn wait_channel_settled(&self, idx: usize) -> Option<ChannelState> {
        let channel = self.contributors[idx].channel();
        let mut changes = channel.subscribe();
        // The channel may already have settled before we subscribed.
        match channel.state() {
            state @ (ChannelState::Attached | ChannelState::Failed) => return Some(state),
            _ => {}
        }
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                change = changes.recv() => match change {
                    Some(change)
                        if matches!(change.current, ChannelState::Attached | ChannelState::Failed) =>
                    {
                        return Some(change.current);
                    }
                    Some(_) => {}
                    None => return None,
                },
            }
        }
    }

    /// Best-effort detach of every contributor but the offending one.
    async fn detach_others(&self, offending: usize) {
        for (idx, contributor) in self.contributors.iter().enumerate() {
            if idx == offending {
                continue;
            }
            if let Err(err) = contributor.channel().detach().await {
                debug!(feature = contributor.feature(), err = %err, "wind-down detach failed");
            }
        }
    }

    // -- Bookkeeping ------------------------------------------------------

    fn record_discontinuity(&self, idx: usize, reason: Option<ErrorInfo>) {
        if !self.first_attach_done[idx].load(Ordering::Acquire) {
            return;
        }
        self.discontinuity.record(idx, reason);
    }

    fn flush_discontinuities(&self) {
        for (idx, reason) in self.discontinuity.drain() {
            let contributor = &self.contributors[idx];
            debug!(feature = contributor.feature(), "notifying feature of message discontinuity");
            contributor.discontinuity_detected(reason);
        }
    }

    /// Apply a room state change. Armed grace timers cannot outlive a room
    /// that is no longer attached.
    fn publish(&self, state: RoomState, error: Option<ErrorInfo>) {
        if matches!(state, RoomState::Failed | RoomState::Detached | RoomState::Suspended) {
            self.timers.clear_all();
        }
        self.status.set_state(state, error);
    }
}

/// Await the next room transition; resolve when it lands on `want`, error
/// with the transition's error otherwise.
async fn next_outcome(
    mut changes: broadcast::Receiver<RoomStateChange>,
    want: RoomState,
) -> Result<(), ErrorInfo> {
    match changes.recv().await {
        Ok(change) if change.current == want => Ok(()),
        Ok(change) => Err(change.error.unwrap_or_else(|| {
            ErrorInfo::new(
                ErrorCode::InternalError,
                format!("room moved to {} during operation", change.current),
            )
        })),
        Err(_) => Err(ErrorInfo::new(ErrorCode::InternalError, "room status stream closed")),
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
