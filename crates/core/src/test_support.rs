// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test fixtures and proptest strategies shared across crates.

use crate::call::{Call, CallId, CallStatus, CallTimes, FIRST_CALL_ID};
use serde_json::json;

/// A fresh `Uncalled` call with a small args payload.
pub fn call_fixture(id: u64) -> Call {
    let mut times = CallTimes::default();
    times.set(CallStatus::Uncalled, 1_000);
    Call::builder()
        .id(CallId(id.max(FIRST_CALL_ID)))
        .args(json!({"x": 3}))
        .times(times)
        .build()
}

/// Proptest strategies for core types.
pub mod strategies {
    use super::*;
    use proptest::prelude::*;

    pub fn any_status() -> impl Strategy<Value = CallStatus> {
        prop_oneof![
            Just(CallStatus::Uncalled),
            Just(CallStatus::Called),
            Just(CallStatus::Running),
            Just(CallStatus::Returned),
            Just(CallStatus::Cancelled),
            Just(CallStatus::Timeout),
        ]
    }
}
