//! The explicit rendezvous flavour: identifiers in, identifiers out.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::Location;
use std::rc::Rc;

use tracing::trace;

use crate::event::cell::{EventCell, OwnerRef};
use crate::event::{Event, Values};
use crate::task::Activation;

use super::{unblock, RendezvousCore, RendezvousState, WaitTable};

pub(crate) struct ExplicitCore<I> {
    state: RendezvousState,
    waiting: RefCell<WaitTable<(I, Rc<EventCell>)>>,
    ready: RefCell<VecDeque<I>>,
}

impl<I: 'static> RendezvousCore for ExplicitCore<I> {
    fn state(&self) -> &RendezvousState {
        &self.state
    }

    fn complete(self: Rc<Self>, watch: u32, _values: bool) {
        // Cancellation also reports its identifier: the awaiter is resumed
        // either way and reads the outcome from the event's slots.
        let (id, _cell) = self.waiting.borrow_mut().remove(watch);
        self.ready.borrow_mut().push_back(id);
        let me: Rc<dyn RendezvousCore> = self;
        unblock(&me);
    }
}

/// A rendezvous that preserves per-event identifiers.
///
/// Each event armed on it carries an identifier of type `I`; when events
/// complete, [`join`](Rendezvous::join) returns those identifiers in
/// completion order. At most one task may block on the rendezvous at a
/// time.
///
/// Dropping the rendezvous cancels every still-armed event: the events
/// become empty and their at-trigger hooks observe `values = false`, but no
/// identifier is reported. A rendezvous expected to be dropped in that
/// state (a short-lived wait scope) should be created with
/// [`Rendezvous::volatile`].
pub struct Rendezvous<I: 'static> {
    core: Rc<ExplicitCore<I>>,
}

impl<I: 'static> Rendezvous<I> {
    /// Creates an empty rendezvous.
    #[must_use]
    pub fn new() -> Self {
        Self::with_flags(false)
    }

    /// Creates a rendezvous whose armed events auto-cancel without surprise
    /// when it is dropped with a task still parked.
    #[must_use]
    pub fn volatile() -> Self {
        Self::with_flags(true)
    }

    fn with_flags(volatile: bool) -> Self {
        Self {
            core: Rc::new(ExplicitCore {
                state: RendezvousState::new(volatile),
                waiting: RefCell::new(WaitTable::new()),
                ready: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Changes the volatile flag.
    pub fn set_volatile(&self, volatile: bool) {
        self.core.state.set_volatile(volatile);
    }

    /// Creates an event armed on this rendezvous, identified by `id`, with
    /// the given output slots.
    pub fn make_event<V: Values>(&self, id: I, slots: V::Slots) -> Event<V> {
        let cell = EventCell::new();
        let watch = self
            .core
            .waiting
            .borrow_mut()
            .insert((id, Rc::clone(&cell)));
        let core_dyn: Rc<dyn RendezvousCore> = self.core.clone();
        let owner: std::rc::Weak<dyn RendezvousCore> = Rc::downgrade(&core_dyn);
        cell.attach_owner(OwnerRef::Weak(owner), watch);
        Event::from_parts(cell, slots)
    }

    /// Creates a slotless event armed on this rendezvous.
    pub fn make(&self, id: I) -> Event<()> {
        self.make_event::<()>(id, ())
    }

    /// Pops the next ready identifier, in event completion order.
    ///
    /// `None` means no event has completed since the last `join`; the
    /// caller should block again (if events are still armed) or finish.
    pub fn join(&self) -> Option<I> {
        self.core.ready.borrow_mut().pop_front()
    }

    /// True if a completed identifier is waiting to be joined.
    #[must_use]
    pub fn has_ready(&self) -> bool {
        !self.core.ready.borrow().is_empty()
    }

    /// True if any event is still armed on this rendezvous.
    #[must_use]
    pub fn has_waiting(&self) -> bool {
        !self.core.waiting.borrow().is_empty()
    }

    /// True if the rendezvous has armed or completed-but-unjoined events.
    #[must_use]
    pub fn has_events(&self) -> bool {
        self.has_ready() || self.has_waiting()
    }

    /// Parks `task` on this rendezvous, to be re-entered at `pos` once an
    /// event completes. If a completion is already waiting, the rendezvous
    /// goes straight onto the unblocked FIFO.
    #[track_caller]
    pub fn block(&self, task: Rc<dyn Activation>, pos: u32) {
        let location = Location::caller();
        task.set_resume_point(pos);
        self.core.state.park(task);
        self.core.state.record_block_site(location);
        trace!(target: "rendez::rendezvous", pos, "task blocked on explicit rendezvous");
        if self.has_ready() {
            let me: Rc<dyn RendezvousCore> = Rc::clone(&self.core) as Rc<dyn RendezvousCore>;
            unblock(&me);
        }
    }
}

impl<I: 'static> Default for Rendezvous<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: 'static> Drop for Rendezvous<I> {
    fn drop(&mut self) {
        debug_assert!(
            self.core.state.is_volatile() || !self.core.state.has_parked(),
            "non-volatile rendezvous dropped with a parked task"
        );
        // Detach every armed event, suppressing flavour completion: hooks
        // observe the cancellation but no identifier is reported.
        loop {
            let next = self.core.waiting.borrow_mut().take_any();
            match next {
                Some((_id, cell)) => EventCell::abandon(&cell),
                None => break,
            }
        }
        self.core.ready.borrow_mut().clear();
        if self.core.state.has_parked() {
            // Let the task observe emptiness and exit.
            let me: Rc<dyn RendezvousCore> = Rc::clone(&self.core) as Rc<dyn RendezvousCore>;
            unblock(&me);
        }
    }
}

impl<I: 'static> std::fmt::Debug for Rendezvous<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Rendezvous");
        s.field("waiting", &self.core.waiting.borrow().len())
            .field("ready", &self.core.ready.borrow().len())
            .field("parked", &self.core.state.has_parked());
        #[cfg(debug_assertions)]
        s.field("blocked_at", &self.core.state.blocked_at());
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Slot;
    use crate::test_util::init_test_logging;

    #[test]
    fn join_returns_identifiers_in_trigger_order() {
        init_test_logging();
        let r = Rendezvous::<&'static str>::new();
        let e1 = r.make("first");
        let e2 = r.make("second");
        let e3 = r.make("third");
        e2.trigger(());
        e3.trigger(());
        e1.trigger(());
        assert_eq!(r.join(), Some("second"));
        assert_eq!(r.join(), Some("third"));
        assert_eq!(r.join(), Some("first"));
        assert_eq!(r.join(), None);
    }

    #[test]
    fn ready_plus_waiting_never_grows_without_arming() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let events: Vec<_> = (0..4).map(|i| r.make(i)).collect();
        let total = |r: &Rendezvous<u32>| {
            r.core.ready.borrow().len() + r.core.waiting.borrow().len()
        };
        let mut last = total(&r);
        for e in &events {
            e.trigger(());
            let now = total(&r);
            assert!(now <= last);
            last = now;
        }
        for _ in 0..4 {
            r.join();
            let now = total(&r);
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn drop_cancels_armed_events_without_reporting() {
        init_test_logging();
        let observed = Slot::new();
        let e;
        {
            let r = Rendezvous::<u32>::volatile();
            e = r.make(1);
            let o = observed.clone();
            e.on_trigger(move |values| o.set(values));
        }
        assert!(!e.is_armed());
        assert_eq!(observed.get(), Some(false));
    }
}
