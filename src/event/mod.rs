//! Events: one-shot, cancellable completion tokens with typed output slots.
//!
//! An [`Event`] is a shared facade over the untyped cell primitive. It is
//! created armed on a rendezvous, may be cloned and passed to whoever will
//! eventually trigger or cancel it, and carries up to four optional output
//! [`Slot`]s pointing at caller storage. Triggering writes every present
//! slot from the trigger's value tuple, then completes the cell; the owning
//! rendezvous records the completion and wakes its parked task.
//!
//! Dropping the last facade of a still-armed event cancels it: cancellation
//! is triggering with `values = false`, which leaves slots untouched but
//! resumes the awaiting task and fires at-trigger hooks.
//!
//! A process-wide dead cell backs default-constructed events, so an
//! `Event::default()` is cheap and all its operations are safe no-ops.

pub(crate) mod cell;

use std::cell::RefCell;
use std::panic::Location;
use std::rc::Rc;

use cell::EventCell;

/// An at-trigger hook: either another event to trigger, or a callback.
///
/// The callback receives the values flag (`false` for cancellation), which
/// is also forwarded when the hook is itself an event: a normal trigger
/// triggers it, a cancellation cancels it.
pub(crate) enum Hook {
    Trigger(Event<()>),
    Call(Box<dyn FnOnce(bool)>),
}

impl Hook {
    pub(crate) fn fire(self, values: bool) {
        match self {
            Self::Trigger(ev) => {
                if values {
                    ev.trigger(());
                } else {
                    ev.cancel();
                }
            }
            Self::Call(f) => f(values),
        }
    }
}

/// A shared handle to caller storage for one output value.
///
/// The storage conventionally lives in the awaiting task's activation
/// record, which outlives every event armed from inside it.
#[derive(Debug)]
pub struct Slot<T> {
    inner: Rc<RefCell<Option<T>>>,
}

impl<T> Slot<T> {
    /// Creates empty slot storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(None)),
        }
    }

    /// Stores a value, replacing any previous one.
    pub fn set(&self, value: T) {
        *self.inner.borrow_mut() = Some(value);
    }

    /// Takes the stored value out.
    pub fn take(&self) -> Option<T> {
        self.inner.borrow_mut().take()
    }

    /// True if a value has been stored and not yet taken.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.borrow().is_some()
    }
}

impl<T: Clone> Slot<T> {
    /// Returns a copy of the stored value, leaving it in place.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.borrow().clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A tuple of values an event delivers when triggered.
///
/// Implemented for `()` through 4-tuples. `Slots` is the matching tuple of
/// optional [`Slot`] handles; a `None` position discards that value.
pub trait Values: Sized + 'static {
    /// The tuple of optional slot handles matching this value tuple.
    type Slots: Clone + Default;

    /// Writes each value into its corresponding present slot.
    fn store(slots: &Self::Slots, values: Self);

    /// Slot handles capturing every position (used by combinators).
    fn capture() -> Self::Slots;

    /// Takes a full value tuple back out of captured slots.
    fn extract(slots: &Self::Slots) -> Option<Self>;
}

impl Values for () {
    type Slots = ();

    fn store(_slots: &Self::Slots, _values: Self) {}

    fn capture() -> Self::Slots {}

    fn extract(_slots: &Self::Slots) -> Option<Self> {
        Some(())
    }
}

impl<T0: 'static> Values for (T0,) {
    type Slots = (Option<Slot<T0>>,);

    fn store(slots: &Self::Slots, values: Self) {
        if let Some(s0) = &slots.0 {
            s0.set(values.0);
        }
    }

    fn capture() -> Self::Slots {
        (Some(Slot::new()),)
    }

    fn extract(slots: &Self::Slots) -> Option<Self> {
        Some((slots.0.as_ref()?.take()?,))
    }
}

impl<T0: 'static, T1: 'static> Values for (T0, T1) {
    type Slots = (Option<Slot<T0>>, Option<Slot<T1>>);

    fn store(slots: &Self::Slots, values: Self) {
        if let Some(s0) = &slots.0 {
            s0.set(values.0);
        }
        if let Some(s1) = &slots.1 {
            s1.set(values.1);
        }
    }

    fn capture() -> Self::Slots {
        (Some(Slot::new()), Some(Slot::new()))
    }

    fn extract(slots: &Self::Slots) -> Option<Self> {
        Some((slots.0.as_ref()?.take()?, slots.1.as_ref()?.take()?))
    }
}

impl<T0: 'static, T1: 'static, T2: 'static> Values for (T0, T1, T2) {
    type Slots = (Option<Slot<T0>>, Option<Slot<T1>>, Option<Slot<T2>>);

    fn store(slots: &Self::Slots, values: Self) {
        if let Some(s0) = &slots.0 {
            s0.set(values.0);
        }
        if let Some(s1) = &slots.1 {
            s1.set(values.1);
        }
        if let Some(s2) = &slots.2 {
            s2.set(values.2);
        }
    }

    fn capture() -> Self::Slots {
        (Some(Slot::new()), Some(Slot::new()), Some(Slot::new()))
    }

    fn extract(slots: &Self::Slots) -> Option<Self> {
        Some((
            slots.0.as_ref()?.take()?,
            slots.1.as_ref()?.take()?,
            slots.2.as_ref()?.take()?,
        ))
    }
}

impl<T0: 'static, T1: 'static, T2: 'static, T3: 'static> Values for (T0, T1, T2, T3) {
    type Slots = (
        Option<Slot<T0>>,
        Option<Slot<T1>>,
        Option<Slot<T2>>,
        Option<Slot<T3>>,
    );

    fn store(slots: &Self::Slots, values: Self) {
        if let Some(s0) = &slots.0 {
            s0.set(values.0);
        }
        if let Some(s1) = &slots.1 {
            s1.set(values.1);
        }
        if let Some(s2) = &slots.2 {
            s2.set(values.2);
        }
        if let Some(s3) = &slots.3 {
            s3.set(values.3);
        }
    }

    fn capture() -> Self::Slots {
        (
            Some(Slot::new()),
            Some(Slot::new()),
            Some(Slot::new()),
            Some(Slot::new()),
        )
    }

    fn extract(slots: &Self::Slots) -> Option<Self> {
        Some((
            slots.0.as_ref()?.take()?,
            slots.1.as_ref()?.take()?,
            slots.2.as_ref()?.take()?,
            slots.3.as_ref()?.take()?,
        ))
    }
}

thread_local! {
    /// The dead cell: permanently empty, backs default-constructed events.
    static DEAD_CELL: Rc<EventCell> = EventCell::new();
}

/// A one-shot, cancellable completion token with typed output slots.
///
/// `V` is the value tuple delivered at trigger time: `()`, `(T0,)`, up to
/// `(T0, T1, T2, T3)`. Facades are reference counted; the event stays armed
/// as long as any facade is live, and cancels when the last facade of a
/// still-armed event drops.
pub struct Event<V: Values = ()> {
    cell: Rc<EventCell>,
    slots: V::Slots,
}

impl<V: Values> Event<V> {
    pub(crate) fn from_parts(cell: Rc<EventCell>, slots: V::Slots) -> Self {
        Self { cell, slots }
    }

    /// Triggers the event, writing `values` into every present slot.
    ///
    /// A second or later trigger is a silent no-op: slots keep the first
    /// trigger's values and hooks do not re-fire.
    pub fn trigger(&self, values: V) {
        if self.cell.is_empty() {
            return;
        }
        V::store(&self.slots, values);
        EventCell::simple_trigger(&self.cell, true);
    }

    /// Cancels the event: completes it with `values = false`, leaving slot
    /// storage untouched. Idempotent.
    pub fn cancel(&self) {
        EventCell::simple_trigger(&self.cell, false);
    }

    /// True while the event has not yet triggered or cancelled.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !self.cell.is_empty()
    }

    /// Registers `hook` to fire when this event completes: a normal trigger
    /// triggers it, a cancellation cancels it. Hooks fire in registration
    /// order. Registering on an already-completed event fires immediately.
    pub fn at_trigger(&self, hook: Event<()>) {
        EventCell::add_hook(&self.cell, Hook::Trigger(hook));
    }

    /// Registers a callback to run when this event completes. The argument
    /// is the values flag: `false` means the completion was a cancellation.
    pub fn on_trigger<F: FnOnce(bool) + 'static>(&self, f: F) {
        EventCell::add_hook(&self.cell, Hook::Call(Box::new(f)));
    }

    /// Records the caller's source location on the event (debug builds).
    #[track_caller]
    #[must_use]
    pub fn annotate(self) -> Self {
        self.cell.annotate(Location::caller());
        self
    }
}

impl<V: Values> Clone for Event<V> {
    fn clone(&self) -> Self {
        self.cell.add_facade();
        Self {
            cell: Rc::clone(&self.cell),
            slots: self.slots.clone(),
        }
    }
}

impl<V: Values> Drop for Event<V> {
    fn drop(&mut self) {
        EventCell::drop_facade(&self.cell);
    }
}

impl<V: Values> Default for Event<V> {
    /// A dead event: never armed, and triggering it is a safe no-op.
    fn default() -> Self {
        let cell = DEAD_CELL.with(|c| {
            c.add_facade();
            Rc::clone(c)
        });
        Self {
            cell,
            slots: V::Slots::default(),
        }
    }
}

impl<V: Values> std::fmt::Debug for Event<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::Rendezvous;
    use crate::test_util::init_test_logging;

    #[test]
    fn default_event_is_dead() {
        init_test_logging();
        let e = Event::<()>::default();
        assert!(!e.is_armed());
        e.trigger(());
        e.cancel();
    }

    #[test]
    fn slots_receive_trigger_values() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let s = Slot::new();
        let e = r.make_event::<(i32,)>(7, (Some(s.clone()),));
        assert!(e.is_armed());
        e.trigger((42,));
        assert_eq!(s.get(), Some(42));
        assert!(!e.is_armed());
        assert_eq!(r.join(), Some(7));
    }

    #[test]
    fn second_trigger_keeps_first_values() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let s = Slot::new();
        let e = r.make_event::<(i32,)>(0, (Some(s.clone()),));
        e.trigger((1,));
        e.trigger((2,));
        assert_eq!(s.get(), Some(1));
        assert_eq!(r.join(), Some(0));
        assert_eq!(r.join(), None);
    }

    #[test]
    fn cancel_is_idempotent_and_leaves_slots() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let s: Slot<i32> = Slot::new();
        let e = r.make_event::<(i32,)>(3, (Some(s.clone()),));
        e.cancel();
        e.cancel();
        assert_eq!(s.get(), None);
        // cancellation still reports the identifier in completion order
        assert_eq!(r.join(), Some(3));
        assert_eq!(r.join(), None);
    }

    #[test]
    fn dropping_last_facade_cancels() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let fired = Slot::new();
        {
            let e = r.make(9);
            let f = fired.clone();
            e.on_trigger(move |values| f.set(values));
        }
        assert_eq!(fired.get(), Some(false));
        assert_eq!(r.join(), Some(9));
    }

    #[test]
    fn hooks_fire_in_registration_order() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let e = r.make(0);
        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            e.on_trigger(move |_| order.borrow_mut().push(tag));
        }
        e.trigger(());
        assert_eq!(*order.borrow(), ["first", "second", "third"]);
    }

    #[test]
    fn hook_on_completed_event_fires_immediately() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let e = r.make(0);
        e.trigger(());
        let fired = Slot::new();
        let f = fired.clone();
        e.on_trigger(move |values| f.set(values));
        assert_eq!(fired.get(), Some(true));
    }

    #[test]
    fn at_trigger_event_chain_propagates_cancel() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let primary = r.make(0);
        let chained = r.make(1);
        let observed = Slot::new();
        let o = observed.clone();
        chained.on_trigger(move |values| o.set(values));
        primary.at_trigger(chained.clone());
        primary.cancel();
        assert_eq!(observed.get(), Some(false));
        assert!(!chained.is_armed());
    }
}
