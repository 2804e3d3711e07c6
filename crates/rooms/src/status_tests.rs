// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use parking_lot::Mutex;

use super::{RoomState, RoomStatus};
use crate::error::{ErrorCode, ErrorInfo};

// ── state and error accessors ─────────────────────────────────────────

#[test]
fn starts_initialized_without_error() {
    let status = RoomStatus::new();
    assert_eq!(status.state(), RoomState::Initialized);
    assert!(status.error().is_none());
}

#[test]
fn set_state_updates_state_and_error() {
    let status = RoomStatus::new();
    let err = ErrorInfo::new(ErrorCode::InternalError, "boom");
    status.set_state(RoomState::Failed, Some(err.clone()));
    assert_eq!(status.state(), RoomState::Failed);
    assert_eq!(status.error(), Some(err));
}

// ── listener semantics ────────────────────────────────────────────────

#[test]
fn listeners_run_in_registration_order() {
    let status = RoomStatus::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        let sink = Arc::clone(&order);
        status.on_change(move |_| sink.lock().push(tag));
    }
    status.set_state(RoomState::Attaching, None);

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[test]
fn change_carries_previous_state() {
    let status = RoomStatus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    status.on_change(move |change| sink.lock().push((change.previous, change.current)));

    status.set_state(RoomState::Attaching, None);
    status.set_state(RoomState::Attached, None);

    assert_eq!(
        *seen.lock(),
        vec![
            (RoomState::Initialized, RoomState::Attaching),
            (RoomState::Attaching, RoomState::Attached),
        ]
    );
}

#[test]
fn once_listener_fires_once() {
    let status = RoomStatus::new();
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    status.on_change_once(move |_| *sink.lock() += 1);

    status.set_state(RoomState::Attaching, None);
    status.set_state(RoomState::Attached, None);

    assert_eq!(*count.lock(), 1);
}

#[test]
fn off_removes_listener() {
    let status = RoomStatus::new();
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let subscription = status.on_change(move |_| *sink.lock() += 1);

    status.set_state(RoomState::Attaching, None);
    subscription.off();
    status.set_state(RoomState::Attached, None);

    assert_eq!(*count.lock(), 1);
}

#[test]
fn off_all_clears_every_listener() {
    let status = RoomStatus::new();
    let count = Arc::new(Mutex::new(0));
    for _ in 0..3 {
        let sink = Arc::clone(&count);
        status.on_change(move |_| *sink.lock() += 1);
    }

    status.off_all();
    status.set_state(RoomState::Attaching, None);

    assert_eq!(*count.lock(), 0);
}

// ── no-op suppression ─────────────────────────────────────────────────

#[test]
fn same_state_same_error_not_emitted() {
    let status = RoomStatus::new();
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    status.on_change(move |_| *sink.lock() += 1);

    status.set_state(RoomState::Attached, None);
    status.set_state(RoomState::Attached, None);

    assert_eq!(*count.lock(), 1);
}

#[test]
fn same_state_new_error_is_emitted() {
    let status = RoomStatus::new();
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    status.on_change(move |_| *sink.lock() += 1);

    status.set_state(RoomState::Suspended, None);
    status.set_state(
        RoomState::Suspended,
        Some(ErrorInfo::new(ErrorCode::InternalError, "still down")),
    );

    assert_eq!(*count.lock(), 2);
}

// ── broadcast stream ──────────────────────────────────────────────────

#[tokio::test]
async fn broadcast_observes_changes() -> anyhow::Result<()> {
    let status = RoomStatus::new();
    let mut changes = status.subscribe();

    status.set_state(RoomState::Attaching, None);
    status.set_state(RoomState::Attached, None);

    let first = changes.recv().await?;
    assert_eq!(first.current, RoomState::Attaching);
    let second = changes.recv().await?;
    assert_eq!(second.current, RoomState::Attached);
    assert_eq!(second.previous, RoomState::Attaching);
    Ok(())
}
