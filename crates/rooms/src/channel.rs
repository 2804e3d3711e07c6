// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport contract: the abstract pub/sub channel a feature is backed by.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ErrorInfo;

/// Lifecycle state of a single transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

impl ChannelState {
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

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition (or same-state update) observed on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStateChange {
    pub current: ChannelState,
    pub previous: ChannelState,
    /// Whether the server resumed the message stream across this
    /// attachment. `false` on an entry into `Attached` means messages may
    /// have been missed.
    pub resumed: bool,
    pub reason: Option<ErrorInfo>,
}

impl ChannelStateChange {
    /// A same-state re-notification rather than a transition.
    pub fn is_update(&self) -> bool {
        self.current == self.previous
    }
}

/// Boxed settle future returned by channel operations.
///
/// Settles once the channel reaches the target state, or errors when it
/// lands in a terminal non-target state instead.
pub type ChannelOp<'a> = Pin<Box<dyn Future<Output = Result<(), ErrorInfo>> + Send + 'a>>;

/// One transport channel with an independent attach/detach state machine.
///
/// Implementations wrap the concrete pub/sub transport; the lifecycle
/// manager only ever drives channels through this trait.
pub trait Channel: Send + Sync {
    /// Current state, read synchronously at call time.
    fn state(&self) -> ChannelState;

    /// The last transport error observed on this channel, if any.
    fn error_reason(&self) -> Option<ErrorInfo>;

    fn attach(&self) -> ChannelOp<'_>;

    fn detach(&self) -> ChannelOp<'_>;

    /// Subscribe to state changes.
    ///
    /// Every transition is delivered, including same-state updates that
    /// carry resume information.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelStateChange>;
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
