//! The gather rendezvous flavour: wait for everything to finish.

use std::cell::RefCell;
use std::panic::Location;
use std::rc::Rc;

use tracing::trace;

use crate::event::cell::{EventCell, OwnerRef};
use crate::event::{Event, Values};
use crate::task::Activation;

use super::{unblock, RendezvousCore, RendezvousState, WaitTable};

pub(crate) struct GatherCore {
    state: RendezvousState,
    waiting: RefCell<WaitTable<Rc<EventCell>>>,
}

impl RendezvousCore for GatherCore {
    fn state(&self) -> &RendezvousState {
        &self.state
    }

    fn complete(self: Rc<Self>, watch: u32, _values: bool) {
        let empty = {
            let mut waiting = self.waiting.borrow_mut();
            let _cell = waiting.remove(watch);
            waiting.is_empty()
        };
        if empty {
            let me: Rc<dyn RendezvousCore> = self;
            unblock(&me);
        }
    }
}

/// A rendezvous without identifiers: its one observable state is "has
/// outstanding armed events".
///
/// The parked task resumes exactly when the waiting table empties, whether
/// each event fired or was cancelled. Used to implement "wait for all of
/// the following to finish".
pub struct GatherRendezvous {
    core: Rc<GatherCore>,
}

impl GatherRendezvous {
    /// Creates an empty gather rendezvous.
    #[must_use]
    pub fn new() -> Self {
        Self::with_flags(false)
    }

    /// Creates a gather rendezvous expected to be dropped with events still
    /// armed.
    #[must_use]
    pub fn volatile() -> Self {
        Self::with_flags(true)
    }

    fn with_flags(volatile: bool) -> Self {
        Self {
            core: Rc::new(GatherCore {
                state: RendezvousState::new(volatile),
                waiting: RefCell::new(WaitTable::new()),
            }),
        }
    }

    /// Changes the volatile flag.
    pub fn set_volatile(&self, volatile: bool) {
        self.core.state.set_volatile(volatile);
    }

    /// Creates an event armed on this rendezvous with the given output
    /// slots.
    pub fn make_event<V: Values>(&self, slots: V::Slots) -> Event<V> {
        let cell = EventCell::new();
        let watch = self.core.waiting.borrow_mut().insert(Rc::clone(&cell));
        let core_dyn: Rc<dyn RendezvousCore> = self.core.clone();
        let owner: std::rc::Weak<dyn RendezvousCore> = Rc::downgrade(&core_dyn);
        cell.attach_owner(OwnerRef::Weak(owner), watch);
        Event::from_parts(cell, slots)
    }

    /// Creates a slotless event armed on this rendezvous.
    pub fn make(&self) -> Event<()> {
        self.make_event::<()>(())
    }

    /// True if any event is still armed.
    #[must_use]
    pub fn has_waiting(&self) -> bool {
        !self.core.waiting.borrow().is_empty()
    }

    /// The number of still-armed events.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.core.waiting.borrow().len()
    }

    /// Parks `task`, to be re-entered at `pos` once every armed event has
    /// completed. Blocking with nothing armed resumes immediately.
    #[track_caller]
    pub fn block(&self, task: Rc<dyn Activation>, pos: u32) {
        let location = Location::caller();
        task.set_resume_point(pos);
        self.core.state.park(task);
        self.core.state.record_block_site(location);
        trace!(target: "rendez::rendezvous", pos, "task blocked on gather rendezvous");
        if !self.has_waiting() {
            let me: Rc<dyn RendezvousCore> = Rc::clone(&self.core) as Rc<dyn RendezvousCore>;
            unblock(&me);
        }
    }
}

impl Default for GatherRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GatherRendezvous {
    fn drop(&mut self) {
        debug_assert!(
            self.core.state.is_volatile() || !self.core.state.has_parked(),
            "non-volatile gather rendezvous dropped with a parked task"
        );
        loop {
            let next = self.core.waiting.borrow_mut().take_any();
            match next {
                Some(cell) => EventCell::abandon(&cell),
                None => break,
            }
        }
        if self.core.state.has_parked() {
            let me: Rc<dyn RendezvousCore> = Rc::clone(&self.core) as Rc<dyn RendezvousCore>;
            unblock(&me);
        }
    }
}

impl std::fmt::Debug for GatherRendezvous {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("GatherRendezvous");
        s.field("waiting", &self.core.waiting.borrow().len())
            .field("parked", &self.core.state.has_parked());
        #[cfg(debug_assertions)]
        s.field("blocked_at", &self.core.state.blocked_at());
        s.finish()
    }
}
