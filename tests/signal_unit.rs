//! Signal delivery scenarios.
//!
//! These tests change process-wide signal dispositions, so they live in
//! their own integration-test binary.

mod common;

use rendez::test_util::init_test_logging;
use rendez::{at_signal, cleanup, initialize, once, ErrorKind, Event, Rendezvous};

#[test]
fn sigusr1_is_one_shot_until_rearmed() {
    init_test_logging();
    initialize().unwrap();

    let r = Rendezvous::<u32>::new();
    at_signal(libc::SIGUSR1, r.make(1)).unwrap();
    // SAFETY: raising a signal this process installed a handler for.
    unsafe { libc::raise(libc::SIGUSR1) };
    once().unwrap();
    assert_eq!(r.join(), Some(1), "handler event fired in the same turn");

    // delivery reset the handler; re-arming installs it again
    at_signal(libc::SIGUSR1, r.make(2)).unwrap();
    // SAFETY: as above.
    unsafe { libc::raise(libc::SIGUSR1) };
    once().unwrap();
    assert_eq!(r.join(), Some(2));

    // disarming restores the default disposition
    at_signal(libc::SIGUSR1, Event::default()).unwrap();
    cleanup();
}

#[test]
fn out_of_range_signum_is_rejected() {
    init_test_logging();
    let r = Rendezvous::<u32>::new();
    let err = at_signal(64, r.make(0)).expect_err("signum outside the table");
    assert_eq!(err.kind(), ErrorKind::BadSignal);
}
