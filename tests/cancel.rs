//! Cancellation scenarios: rendezvous destruction cascades and races.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use common::drive_until;
use rendez::event::Slot;
use rendez::task::ResumePoint;
use rendez::test_util::init_test_logging;
use rendez::{at_delay, cleanup, initialize, once, spawn, Activation, Event, Rendezvous};

struct Scoped {
    pos: ResumePoint,
    r: RefCell<Weak<Rendezvous<u32>>>,
    outcome: Cell<Option<&'static str>>,
}

impl Activation for Scoped {
    fn activate(self: Rc<Self>) {
        match self.pos.get() {
            0 => {
                let r = self.r.borrow().upgrade().expect("rendezvous alive at start");
                r.block(self.clone(), 1);
            }
            1 => match self.r.borrow().upgrade() {
                Some(r) => {
                    while r.join().is_some() {}
                    if r.has_waiting() {
                        r.block(self.clone(), 1);
                    } else {
                        self.outcome.set(Some("drained"));
                    }
                }
                None => self.outcome.set(Some("destroyed")),
            },
            _ => unreachable!(),
        }
    }

    fn set_resume_point(&self, pos: u32) {
        self.pos.set(pos);
    }
}

#[test]
fn destroying_a_parked_volatile_rendezvous_cascades() {
    init_test_logging();
    initialize().unwrap();

    let r = Rc::new(Rendezvous::<u32>::volatile());
    let events: Vec<Event<()>> = (0..3).map(|i| r.make(i)).collect();
    let observed: Vec<Slot<bool>> = (0..3).map(|_| Slot::new()).collect();
    for (e, s) in events.iter().zip(&observed) {
        let s = s.clone();
        e.on_trigger(move |values| s.set(values));
    }

    let task = Rc::new(Scoped {
        pos: ResumePoint::new(),
        r: RefCell::new(Rc::downgrade(&r)),
        outcome: Cell::new(None),
    });
    spawn(task.clone());

    // Scope exit before any trigger: every event auto-cancels.
    drop(r);
    for e in &events {
        assert!(!e.is_armed(), "armed event transitioned to empty");
    }
    for s in &observed {
        assert_eq!(s.get(), Some(false), "hooks observed the cancellation");
    }

    // The parked task gets one resumption and observes the destruction.
    once().unwrap();
    assert_eq!(task.outcome.get(), Some("destroyed"));

    cleanup();
}

struct Racer {
    pos: ResumePoint,
    r: Rendezvous<&'static str>,
    loser: RefCell<Option<Event<()>>>,
    winner: Cell<Option<&'static str>>,
}

impl Activation for Racer {
    fn activate(self: Rc<Self>) {
        match self.pos.get() {
            0 => self.r.block(self.clone(), 1),
            1 => {
                let id = self.r.join().expect("one competitor completed");
                self.winner.set(Some(id));
                if let Some(loser) = self.loser.borrow_mut().take() {
                    loser.cancel();
                }
            }
            _ => unreachable!(),
        }
    }

    fn set_resume_point(&self, pos: u32) {
        self.pos.set(pos);
    }
}

#[test]
fn timer_race_cancels_the_loser() {
    init_test_logging();
    initialize().unwrap();

    let task = Rc::new(Racer {
        pos: ResumePoint::new(),
        r: Rendezvous::new(),
        loser: RefCell::new(None),
        winner: Cell::new(None),
    });
    let operation = task.r.make("operation");
    let timer = task.r.make("timer");
    *task.loser.borrow_mut() = Some(operation.clone());
    at_delay(Duration::from_millis(5), timer).unwrap();
    spawn(task.clone());

    // the operation never completes; the timer wins the race
    drive_until(|| task.winner.get().is_some());
    assert_eq!(task.winner.get(), Some("timer"));
    assert!(!operation.is_armed(), "the losing event was cancelled");

    cleanup();
}

#[test]
fn cancel_cancel_equals_cancel() {
    init_test_logging();
    let r = Rendezvous::<u32>::new();
    let fired = Rc::new(RefCell::new(Vec::new()));
    let e = r.make(1);
    let f = Rc::clone(&fired);
    e.on_trigger(move |values| f.borrow_mut().push(values));

    e.cancel();
    e.cancel();
    assert_eq!(*fired.borrow(), [false], "the hook fired exactly once");
    assert_eq!(r.join(), Some(1));
    assert_eq!(r.join(), None);
}
