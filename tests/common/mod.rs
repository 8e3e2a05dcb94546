//! Shared helpers for the integration tests.

#![allow(dead_code)]

/// Runs driver turns until `cond` holds, with a generous turn budget so a
/// wedged loop fails loudly instead of hanging the test.
pub fn drive_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        rendez::once().expect("driver turn failed");
    }
    panic!("condition not reached within the turn budget");
}
