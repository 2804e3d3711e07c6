// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::Deserialize;
use std::time::Duration;

/// Tunables for a room's lifecycle manager.
///
/// Deserializable so it can be embedded in a larger SDK configuration file;
/// every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Grace period in milliseconds before a channel detachment is treated
    /// as a real outage rather than a transient flap.
    pub transient_detach_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { transient_detach_timeout_ms: 5_000 }
    }
}

impl LifecycleConfig {
    pub fn transient_detach_timeout(&self) -> Duration {
        Duration::from_millis(self.transient_detach_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
