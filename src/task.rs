//! The closure activation protocol for cooperative tasks.
//!
//! A task is a hand-written state machine: a struct holding its local
//! variables plus a resumption point, re-entered through
//! [`Activation::activate`], which dispatches on the stored point. To
//! suspend, the task arms events on a rendezvous, calls `block(self, POS)`
//! on it, and returns; when the rendezvous acquires a ready completion, the
//! driver re-enters the task, which resumes at `POS`.
//!
//! The shape of a typical task:
//!
//! ```ignore
//! struct Greeter {
//!     pos: ResumePoint,
//!     wait: GatherRendezvous,
//! }
//!
//! impl Activation for Greeter {
//!     fn activate(self: Rc<Self>) {
//!         match self.pos.get() {
//!             0 => {
//!                 rendez::at_delay(Duration::from_millis(5), self.wait.make()).unwrap();
//!                 self.wait.block(self.clone(), 1);
//!             }
//!             1 => { /* timer fired; finish */ }
//!             _ => unreachable!(),
//!         }
//!     }
//!     fn set_resume_point(&self, pos: u32) {
//!         self.pos.set(pos);
//!     }
//! }
//! ```
//!
//! Ownership: tasks are `Rc`-allocated. While parked, the rendezvous holds
//! the only scheduling reference; when the task finishes and returns
//! without blocking, the last `Rc` drops and any rendezvous it owns clears
//! itself, cancelling still-armed events.

use std::cell::Cell;
use std::rc::Rc;

/// A cooperative task re-entered by the driver.
pub trait Activation {
    /// Re-enters the task. Implementations dispatch on the stored
    /// resumption point and either run to completion or block again.
    fn activate(self: Rc<Self>);

    /// Records the point at which the next activation resumes. Called by
    /// the rendezvous `block` primitive before parking.
    fn set_resume_point(&self, pos: u32);
}

/// The stored resumption point of a task state machine.
#[derive(Debug, Default)]
pub struct ResumePoint(Cell<u32>);

impl ResumePoint {
    /// A fresh resumption point, starting at position 0.
    #[must_use]
    pub fn new() -> Self {
        Self(Cell::new(0))
    }

    /// The position the next activation dispatches on.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Stores the next resumption position.
    pub fn set(&self, pos: u32) {
        self.0.set(pos);
    }
}

/// Starts a task: runs it until it first blocks or completes.
pub fn spawn(task: Rc<dyn Activation>) {
    task.activate();
}
