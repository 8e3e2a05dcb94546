//! Fd wrapper scenarios: echo, ordered writes, close cancellation.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::drive_until;
use rendez::event::Slot;
use rendez::test_util::init_test_logging;
use rendez::{at_fd_read, cleanup, initialize, once, Fd, Rendezvous};

fn result_event(r: &Rendezvous<&'static str>, id: &'static str) -> (rendez::Event<(i32,)>, Slot<i32>) {
    let slot = Slot::new();
    let event = r.make_event::<(i32,)>(id, (Some(slot.clone()),));
    (event, slot)
}

#[test]
fn socketpair_echo_fires_once() {
    init_test_logging();
    initialize().unwrap();

    let (p, q) = Fd::socketpair().unwrap();
    let r = Rendezvous::<&'static str>::new();

    // one-shot readiness on p, observed directly
    let ready = r.make("ready");
    at_fd_read(p.raw(), ready.clone()).unwrap();

    let (wdone, wres) = result_event(&r, "write");
    q.write(b"hi".to_vec(), wdone);

    drive_until(|| !ready.is_armed());
    assert_eq!(wres.get(), Some(2));

    // reading p yields exactly what was written
    let buf = Rc::new(RefCell::new(Vec::new()));
    let (rdone, rres) = result_event(&r, "read");
    p.read(Rc::clone(&buf), 16, rdone);
    drive_until(|| rres.is_set());
    assert_eq!(rres.get(), Some(2));
    assert_eq!(&*buf.borrow(), b"hi");

    // completion order: the write finished in the turn before readiness
    // was observed; the readiness event was not re-armed afterwards
    once().unwrap();
    assert_eq!(r.join(), Some("write"));
    assert_eq!(r.join(), Some("ready"));
    assert_eq!(r.join(), Some("read"));
    assert_eq!(r.join(), None);

    cleanup();
}

#[test]
fn writes_complete_in_issue_order() {
    init_test_logging();
    initialize().unwrap();

    let (p, q) = Fd::socketpair().unwrap();
    let r = Rendezvous::<&'static str>::new();

    // the first write overflows the socket buffer, forcing the later ones
    // to queue behind it
    let big = vec![b'A'; 1 << 20];
    let (d1, s1) = result_event(&r, "first");
    let (d2, s2) = result_event(&r, "second");
    let (d3, s3) = result_event(&r, "third");
    p.write(big.clone(), d1);
    p.write(b"B".to_vec(), d2);
    p.write(b"C".to_vec(), d3);

    let expected_len = big.len() + 2;
    let received = Rc::new(RefCell::new(Vec::new()));
    while received.borrow().len() < expected_len {
        let chunk = Slot::new();
        let gather = Rendezvous::<u32>::new();
        let done = gather.make_event::<(i32,)>(0, (Some(chunk.clone()),));
        q.read(Rc::clone(&received), 64 * 1024, done);
        drive_until(|| chunk.is_set());
        let n = chunk.get().expect("read completed");
        assert!(n > 0, "reader saw neither EOF nor error mid-stream");
    }

    assert_eq!(s1.get(), Some(big.len() as i32));
    assert_eq!(s2.get(), Some(1));
    assert_eq!(s3.get(), Some(1));
    assert_eq!(r.join(), Some("first"));
    assert_eq!(r.join(), Some("second"));
    assert_eq!(r.join(), Some("third"));

    // the wire carries the bytes in issue order
    let bytes = received.borrow();
    assert_eq!(&bytes[..big.len()], &big[..]);
    assert_eq!(&bytes[big.len()..], b"BC");

    cleanup();
}

#[test]
fn close_cancels_inflight_reads() {
    init_test_logging();
    initialize().unwrap();

    let (p, q) = Fd::socketpair().unwrap();
    let r = Rendezvous::<&'static str>::new();
    let buf = Rc::new(RefCell::new(Vec::new()));
    let (done, res) = result_event(&r, "read");
    p.read(Rc::clone(&buf), 16, done);

    // let the read park on fd readiness, then close underneath it
    once().unwrap();
    assert!(!res.is_set());
    p.close().unwrap();

    drive_until(|| res.is_set());
    assert_eq!(res.get(), Some(-libc::ECANCELED));
    assert!(buf.borrow().is_empty());

    drop(q);
    cleanup();
}
