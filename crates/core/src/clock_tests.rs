// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_returns_increasing_time() {
    let clock = SystemClock;
    let t1 = clock.now();
    std::thread::sleep(Duration::from_millis(1));
    let t2 = clock.now();
    assert!(t2 > t1);
}

#[test]
fn system_clock_micros_is_epoch_scale() {
    let clock = SystemClock;
    // Anything after 2020 in microseconds
    assert!(clock.micros() > 1_577_836_800_000_000);
}

#[test]
fn fake_clock_advances_both_scales() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let m1 = clock.micros();

    clock.advance(Duration::from_secs(60));

    assert!(clock.now().duration_since(t1) >= Duration::from_secs(60));
    assert_eq!(clock.micros(), m1 + 60_000_000);
}

#[test]
fn fake_clock_is_shared_across_clones() {
    let clock1 = FakeClock::new();
    let clock2 = clock1.clone();
    clock2.advance(Duration::from_secs(30));
    assert_eq!(clock1.micros(), clock2.micros());
}

#[test]
fn fake_clock_set_micros() {
    let clock = FakeClock::new();
    clock.set_micros(42);
    assert_eq!(clock.micros(), 42);
}
