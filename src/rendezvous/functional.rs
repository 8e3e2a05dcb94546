//! The functional rendezvous flavour: completions run a callback.
//!
//! A functional rendezvous never parks a task and keeps no ready queue; it
//! exists to build derived events (see [`crate::combinator`]). Nothing owns
//! it from outside: each event armed on it holds the core strongly, and the
//! reference drops when the event completes.

use std::cell::RefCell;
use std::rc::Rc;

use crate::event::cell::{EventCell, OwnerRef};
use crate::event::{Event, Values};

use super::{RendezvousCore, RendezvousState, WaitTable};

type CompletionFn = Box<dyn FnMut(bool)>;

pub(crate) struct FnCore {
    state: RendezvousState,
    waiting: RefCell<WaitTable<Rc<EventCell>>>,
    completion: RefCell<Option<CompletionFn>>,
}

impl FnCore {
    pub(crate) fn new<F: FnMut(bool) + 'static>(completion: F) -> Rc<Self> {
        Rc::new(Self {
            state: RendezvousState::new(false),
            waiting: RefCell::new(WaitTable::new()),
            completion: RefCell::new(Some(Box::new(completion))),
        })
    }

    /// Arms a new event on this core. The event keeps the core alive until
    /// it completes.
    pub(crate) fn arm<V: Values>(core: &Rc<Self>, slots: V::Slots) -> Event<V> {
        let cell = EventCell::new();
        let watch = core.waiting.borrow_mut().insert(Rc::clone(&cell));
        let owner: Rc<dyn RendezvousCore> = Rc::clone(core) as Rc<dyn RendezvousCore>;
        cell.attach_owner(OwnerRef::Strong(owner), watch);
        Event::from_parts(cell, slots)
    }
}

impl RendezvousCore for FnCore {
    fn state(&self) -> &RendezvousState {
        &self.state
    }

    fn complete(self: Rc<Self>, watch: u32, values: bool) {
        let _cell = self.waiting.borrow_mut().remove(watch);
        // Take the callback out while it runs so a reentrant completion on
        // the same core cannot alias the borrow.
        let mut completion = self.completion.borrow_mut().take();
        if let Some(f) = completion.as_mut() {
            f(values);
        }
        let mut slot = self.completion.borrow_mut();
        if slot.is_none() {
            *slot = completion;
        }
    }
}
