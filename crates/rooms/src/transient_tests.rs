// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::TransientDetachTimers;
use crate::test_support::settle;

fn timers(ms: u64) -> (TransientDetachTimers, CancellationToken) {
    let parent = CancellationToken::new();
    (TransientDetachTimers::new(Duration::from_millis(ms), parent.clone()), parent)
}

fn expiry_log() -> (Arc<Mutex<Vec<u64>>>, impl FnOnce(u64) + Send + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |generation| sink.lock().push(generation))
}

#[tokio::test(start_paused = true)]
async fn fires_after_timeout() {
    let (timers, _parent) = timers(50);
    let (fired, on_expire) = expiry_log();
    let generation = timers.arm(0, on_expire);
    assert!(timers.is_armed(0));

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;

    assert_eq!(*fired.lock(), vec![generation]);
    // Expiry does not consume the entry; `take` does.
    assert!(timers.is_armed(0));
    assert!(timers.take(0, generation));
    assert!(!timers.is_armed(0));
    assert!(!timers.take(0, generation));
}

#[tokio::test(start_paused = true)]
async fn disarm_cancels_pending_expiry() {
    let (timers, _parent) = timers(50);
    let (fired, on_expire) = expiry_log();
    timers.arm(0, on_expire);

    timers.disarm(0);
    assert!(!timers.is_armed(0));

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    assert!(fired.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rearm_supersedes_previous_generation() {
    let (timers, _parent) = timers(50);
    let (first_fired, first_expire) = expiry_log();
    let (second_fired, second_expire) = expiry_log();

    let first = timers.arm(0, first_expire);
    let second = timers.arm(0, second_expire);
    assert_ne!(first, second);

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;

    assert!(first_fired.lock().is_empty());
    assert_eq!(*second_fired.lock(), vec![second]);
    // A stale generation cannot consume the live entry.
    assert!(!timers.take(0, first));
    assert!(timers.take(0, second));
}

#[tokio::test(start_paused = true)]
async fn clear_all_cancels_every_timer() {
    let (timers, _parent) = timers(50);
    let (fired, on_expire) = expiry_log();
    timers.arm(0, on_expire);
    let (fired_other, on_expire_other) = expiry_log();
    timers.arm(1, on_expire_other);

    timers.clear_all();
    assert!(!timers.is_armed(0));
    assert!(!timers.is_armed(1));

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    assert!(fired.lock().is_empty());
    assert!(fired_other.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn parent_cancellation_silences_timers() {
    let (timers, parent) = timers(50);
    let (fired, on_expire) = expiry_log();
    timers.arm(0, on_expire);

    parent.cancel();
    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    assert!(fired.lock().is_empty());
}
