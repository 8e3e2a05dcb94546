//! The untyped event primitive.
//!
//! An [`EventCell`] is the smallest completion token: it is either *armed*
//! (registered in some rendezvous's waiting table) or *empty* (already
//! triggered or cancelled). The typed [`Event`](super::Event) facade layers
//! output slots on top; everything about armed/empty state, hook dispatch,
//! and owner notification lives here.

use std::cell::{Cell, RefCell};
#[cfg(debug_assertions)]
use std::panic::Location;
use std::rc::{Rc, Weak};

use crate::rendezvous::RendezvousCore;

use super::Hook;

/// How a cell refers back to the rendezvous it is armed on.
///
/// Rendezvous handles own their core, so cells armed on them hold a weak
/// back-pointer. Functional cores are owned by nothing but the events armed
/// on them, so those cells hold the core strongly; the reference is dropped
/// when the cell completes, breaking the cycle.
pub(crate) enum OwnerRef {
    /// Non-owning back-pointer (explicit and gather rendezvous).
    Weak(Weak<dyn RendezvousCore>),
    /// Owning back-pointer (functional rendezvous).
    Strong(Rc<dyn RendezvousCore>),
}

impl OwnerRef {
    fn upgrade(&self) -> Option<Rc<dyn RendezvousCore>> {
        match self {
            Self::Weak(w) => w.upgrade(),
            Self::Strong(s) => Some(Rc::clone(s)),
        }
    }
}

/// The armed state: owner back-pointer plus the watch index the owner
/// assigned when this cell was linked into its waiting table.
pub(crate) struct WatchRef {
    pub(crate) owner: OwnerRef,
    pub(crate) watch: u32,
}

/// The untyped one-shot completion primitive.
///
/// Invariants:
/// - armed ⇔ `watch` is `Some` ⇔ the cell is reachable from its owner's
///   waiting table;
/// - once completed or cancelled the back-pointer is cleared and the cell is
///   unlinked, in that order;
/// - `facades` counts live typed facades; when it reaches zero while the
///   cell is still armed, the cell cancels itself.
pub(crate) struct EventCell {
    watch: RefCell<Option<WatchRef>>,
    facades: Cell<usize>,
    hook: RefCell<Option<Hook>>,
    #[cfg(debug_assertions)]
    annotation: Cell<Option<&'static Location<'static>>>,
}

impl EventCell {
    /// Creates a new unarmed cell with one facade reference.
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            watch: RefCell::new(None),
            facades: Cell::new(1),
            hook: RefCell::new(None),
            #[cfg(debug_assertions)]
            annotation: Cell::new(None),
        })
    }

    /// Links the cell to its owner. Called exactly once, immediately after
    /// the owner inserted the cell into its waiting table.
    pub(crate) fn attach_owner(&self, owner: OwnerRef, watch: u32) {
        let mut slot = self.watch.borrow_mut();
        debug_assert!(slot.is_none(), "event armed twice");
        *slot = Some(WatchRef { owner, watch });
    }

    /// The empty predicate: true once the cell has triggered or cancelled.
    pub(crate) fn is_empty(&self) -> bool {
        self.watch.borrow().is_none()
    }

    pub(crate) fn add_facade(&self) {
        self.facades.set(self.facades.get() + 1);
    }

    /// Drops one facade reference; the last facade of an armed cell cancels
    /// it.
    pub(crate) fn drop_facade(cell: &Rc<Self>) {
        let n = cell.facades.get() - 1;
        cell.facades.set(n);
        if n == 0 && !cell.is_empty() {
            Self::simple_trigger(cell, false);
        }
    }

    /// Completes the cell. `values` is false only for cancellation.
    ///
    /// Already-empty cells ignore the call. Otherwise: the owner pointer is
    /// cleared, the owner unlinks the cell and records the completion per
    /// its flavour, and finally the at-trigger hook fires with the same
    /// `values` flag.
    pub(crate) fn simple_trigger(cell: &Rc<Self>, values: bool) {
        let Some(WatchRef { owner, watch }) = cell.watch.borrow_mut().take() else {
            return;
        };
        if let Some(core) = owner.upgrade() {
            core.complete(watch, values);
        }
        Self::fire_hook(cell, values);
    }

    /// Finishes a cell whose owner already unlinked it (rendezvous clear).
    ///
    /// The flavour completion is suppressed; hooks still observe the
    /// cancellation.
    pub(crate) fn abandon(cell: &Rc<Self>) {
        let detached = cell.watch.borrow_mut().take();
        debug_assert!(
            detached.is_some(),
            "abandon() expects a cell still marked armed"
        );
        Self::fire_hook(cell, false);
    }

    /// Registers an at-trigger hook.
    ///
    /// One hook slot exists inline; a second registration composes the two
    /// into a single hook firing in registration order. A hook registered on
    /// an already-empty cell fires immediately.
    pub(crate) fn add_hook(cell: &Rc<Self>, hook: Hook) {
        if cell.is_empty() {
            hook.fire(true);
            return;
        }
        let mut slot = cell.hook.borrow_mut();
        *slot = Some(match slot.take() {
            None => hook,
            Some(prev) => Hook::Call(Box::new(move |values| {
                prev.fire(values);
                hook.fire(values);
            })),
        });
    }

    fn fire_hook(cell: &Rc<Self>, values: bool) {
        let hook = cell.hook.borrow_mut().take();
        if let Some(hook) = hook {
            hook.fire(values);
        }
    }

    /// Records the caller's source location on debug builds.
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub(crate) fn annotate(&self, location: &'static std::panic::Location<'static>) {
        #[cfg(debug_assertions)]
        self.annotation.set(Some(location));
    }

    /// The recorded source location, if any.
    #[cfg(debug_assertions)]
    pub(crate) fn annotation(&self) -> Option<&'static Location<'static>> {
        self.annotation.get()
    }
}

impl std::fmt::Debug for EventCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("EventCell");
        s.field("armed", &!self.is_empty())
            .field("facades", &self.facades.get());
        #[cfg(debug_assertions)]
        s.field("annotated_at", &self.annotation());
        s.finish()
    }
}
