//! Rendezvous: synchronisation objects events are armed on.
//!
//! A rendezvous owns the waiting table its armed events are linked into and
//! carries at most one parked task. Three flavours exist:
//!
//! - **explicit** ([`Rendezvous`]): preserves per-event identifiers and
//!   reports them to the awaiter in FIFO completion order via
//!   [`Rendezvous::join`];
//! - **gather** ([`GatherRendezvous`]): anonymous; the awaiter only learns
//!   "all outstanding events are done";
//! - **functional** (crate-internal): runs a callback on each completion
//!   instead of waking a task; it backs the derived-event combinators.
//!
//! The flavours share a base: the parked task, the queued flag that keeps
//! the per-thread unblocked FIFO free of duplicates, and the volatile flag
//! marking a rendezvous expected to be destroyed with events still armed.

pub(crate) mod explicit;
pub(crate) mod functional;
pub(crate) mod gather;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
#[cfg(debug_assertions)]
use std::panic::Location;
use std::rc::Rc;

use crate::task::Activation;

pub use explicit::Rendezvous;
pub use gather::GatherRendezvous;

/// State shared by every rendezvous flavour.
pub(crate) struct RendezvousState {
    parked: RefCell<Option<Rc<dyn Activation>>>,
    queued: Cell<bool>,
    volatile: Cell<bool>,
    #[cfg(debug_assertions)]
    blocked_at: Cell<Option<&'static Location<'static>>>,
}

impl RendezvousState {
    pub(crate) fn new(volatile: bool) -> Self {
        Self {
            parked: RefCell::new(None),
            queued: Cell::new(false),
            volatile: Cell::new(volatile),
            #[cfg(debug_assertions)]
            blocked_at: Cell::new(None),
        }
    }

    pub(crate) fn is_volatile(&self) -> bool {
        self.volatile.get()
    }

    pub(crate) fn set_volatile(&self, volatile: bool) {
        self.volatile.set(volatile);
    }

    pub(crate) fn has_parked(&self) -> bool {
        self.parked.borrow().is_some()
    }

    /// Parks `task`; at most one task may be parked at a time.
    pub(crate) fn park(&self, task: Rc<dyn Activation>) {
        let mut parked = self.parked.borrow_mut();
        debug_assert!(
            parked.is_none(),
            "a task is already parked on this rendezvous"
        );
        *parked = Some(task);
    }

    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub(crate) fn record_block_site(&self, location: &'static std::panic::Location<'static>) {
        #[cfg(debug_assertions)]
        self.blocked_at.set(Some(location));
    }

    /// The source location of the task's last block (debug builds).
    #[cfg(debug_assertions)]
    pub(crate) fn blocked_at(&self) -> Option<&'static Location<'static>> {
        self.blocked_at.get()
    }
}

/// The interface shared by the three rendezvous flavours.
///
/// Represented as a trait object rather than an inheritance tree; the
/// functional flavour's callback is the only vtable-like dispatch beyond
/// `complete` itself.
pub(crate) trait RendezvousCore {
    /// The shared base state.
    fn state(&self) -> &RendezvousState;

    /// Unlinks the event at `watch` from the waiting table and records its
    /// completion per flavour. `values` is false for cancellation.
    fn complete(self: Rc<Self>, watch: u32, values: bool);

    /// Re-enters the parked task, if any. The parked slot is cleared first
    /// so the task may block again from inside its activation.
    fn run(&self) {
        let task = self.state().parked.borrow_mut().take();
        if let Some(task) = task {
            task.activate();
        }
    }
}

thread_local! {
    /// FIFO of rendezvous with at least one ready completion and a parked
    /// task. Drained by the driver at the end of each turn.
    static UNBLOCKED: RefCell<VecDeque<Rc<dyn RendezvousCore>>> =
        RefCell::new(VecDeque::new());
}

/// Appends `core` to the unblocked FIFO if it has a parked task and is not
/// already queued.
pub(crate) fn unblock(core: &Rc<dyn RendezvousCore>) {
    let st = core.state();
    if st.has_parked() && !st.queued.get() {
        st.queued.set(true);
        UNBLOCKED.with(|q| q.borrow_mut().push_back(Rc::clone(core)));
    }
}

/// True if any rendezvous is waiting to resume its task.
pub(crate) fn has_unblocked() -> bool {
    UNBLOCKED.with(|q| !q.borrow().is_empty())
}

/// Pops and runs unblocked rendezvous until the FIFO is empty. A task may
/// enqueue further rendezvous during its activation; they are processed in
/// this same drain.
pub(crate) fn drain_unblocked() {
    loop {
        let next = UNBLOCKED.with(|q| q.borrow_mut().pop_front());
        match next {
            Some(core) => {
                core.state().queued.set(false);
                core.run();
            }
            None => break,
        }
    }
}

/// A waiting table with stable indices and an embedded free list.
///
/// Armed events record the index they were inserted at and unlink
/// themselves in O(1) through it.
pub(crate) struct WaitTable<T> {
    slots: Vec<WaitEntry<T>>,
    free: Option<u32>,
    len: usize,
}

enum WaitEntry<T> {
    Full(T),
    Free { next: Option<u32> },
}

impl<T> WaitTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn insert(&mut self, value: T) -> u32 {
        self.len += 1;
        if let Some(idx) = self.free {
            match std::mem::replace(&mut self.slots[idx as usize], WaitEntry::Full(value)) {
                WaitEntry::Free { next } => self.free = next,
                WaitEntry::Full(_) => unreachable!("free list pointed at an occupied slot"),
            }
            idx
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(WaitEntry::Full(value));
            idx
        }
    }

    pub(crate) fn remove(&mut self, idx: u32) -> T {
        let entry = std::mem::replace(
            &mut self.slots[idx as usize],
            WaitEntry::Free { next: self.free },
        );
        match entry {
            WaitEntry::Full(value) => {
                self.free = Some(idx);
                self.len -= 1;
                value
            }
            WaitEntry::Free { .. } => unreachable!("watch index was not armed"),
        }
    }

    /// Removes and returns an arbitrary occupied entry (used by the clear
    /// protocol on rendezvous destruction).
    pub(crate) fn take_any(&mut self) -> Option<T> {
        let idx = self
            .slots
            .iter()
            .position(|e| matches!(e, WaitEntry::Full(_)))?;
        Some(self.remove(idx as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_table_reuses_slots() {
        let mut t = WaitTable::new();
        let a = t.insert("a");
        let b = t.insert("b");
        assert_eq!(t.len(), 2);
        assert_eq!(t.remove(a), "a");
        let c = t.insert("c");
        assert_eq!(c, a, "freed slot is reused");
        assert_eq!(t.remove(b), "b");
        assert_eq!(t.remove(c), "c");
        assert!(t.is_empty());
    }

    #[test]
    fn take_any_drains_everything() {
        let mut t = WaitTable::new();
        t.insert(1);
        t.insert(2);
        t.insert(3);
        let mut out = Vec::new();
        while let Some(v) = t.take_any() {
            out.push(v);
        }
        out.sort_unstable();
        assert_eq!(out, [1, 2, 3]);
        assert!(t.is_empty());
    }
}
