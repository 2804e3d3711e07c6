// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::LifecycleConfig;

#[test]
fn default_grace_is_five_seconds() {
    let config = LifecycleConfig::default();
    assert_eq!(config.transient_detach_timeout(), Duration::from_secs(5));
}

#[test]
fn deserialize_empty_uses_defaults() -> anyhow::Result<()> {
    let config: LifecycleConfig = serde_json::from_str("{}")?;
    assert_eq!(config.transient_detach_timeout_ms, 5_000);
    Ok(())
}

#[test]
fn deserialize_override() -> anyhow::Result<()> {
    let config: LifecycleConfig =
        serde_json::from_str(r#"{"transient_detach_timeout_ms": 250}"#)?;
    assert_eq!(config.transient_detach_timeout(), Duration::from_millis(250));
    Ok(())
}
