// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn kinds_display_with_on_prefix() {
    assert_eq!(EventKind::Init.to_string(), "on_init");
    assert_eq!(EventKind::Reap.to_string(), "on_reap");
    assert_eq!(EventKind::PidChange.to_string(), "on_pidchange");
}

#[test]
fn kind_serde_uses_snake_case() {
    let json = serde_json::to_string(&EventKind::Shutdown).unwrap();
    assert_eq!(json, "\"shutdown\"");
}

#[test]
fn payload_accessors() {
    assert_eq!(EventPayload::Signal(15).signal(), Some(15));
    assert_eq!(EventPayload::None.signal(), None);

    let err = EventPayload::Error("store gone".to_string());
    assert_eq!(err.error(), Some("store gone"));
    assert_eq!(err.signal(), None);
}
