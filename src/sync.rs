//! The cooperative event-queue mutex.
//!
//! [`MutexEvent`] serialises cooperative operations without blocking the
//! thread: acquiring when the lock is free triggers the waiter event
//! immediately; otherwise the event joins a FIFO queue and fires when the
//! lock is handed over. The fd wrapper uses one per direction so reads
//! (and, independently, writes) complete in issue order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::event::Event;

#[derive(Default)]
struct MutexState {
    locked: bool,
    waiters: VecDeque<Event<()>>,
}

/// A FIFO mutex whose grant is an event trigger.
///
/// Cloning shares the same lock.
#[derive(Clone, Default)]
pub struct MutexEvent {
    state: Rc<RefCell<MutexState>>,
}

impl MutexEvent {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while some acquirer holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.borrow().locked
    }

    /// Requests the lock. If it is free, `waiter` triggers immediately and
    /// the caller holds the lock; otherwise `waiter` fires when every
    /// earlier acquirer has released. A cancelled waiter is skipped at
    /// hand-over and never holds the lock.
    pub fn acquire(&self, waiter: Event<()>) {
        let grant_now = {
            let mut state = self.state.borrow_mut();
            if state.locked {
                state.waiters.push_back(waiter.clone());
                false
            } else {
                state.locked = true;
                true
            }
        };
        if grant_now {
            waiter.trigger(());
        }
    }

    /// Releases the lock, handing it to the next live waiter in FIFO order.
    pub fn release(&self) {
        loop {
            let next = self.state.borrow_mut().waiters.pop_front();
            match next {
                Some(waiter) if waiter.is_armed() => {
                    // Ownership transfers; the lock stays held.
                    waiter.trigger(());
                    return;
                }
                Some(_cancelled) => {}
                None => {
                    self.state.borrow_mut().locked = false;
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for MutexEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MutexEvent")
            .field("locked", &state.locked)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
