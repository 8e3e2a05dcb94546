//! Timer storage: a slab with stable slots plus a back-indexed min-heap.
//!
//! Timer records live in a slab whose freed slots are chained through an
//! embedded free list, so a record's index is stable for its whole life.
//! The heap is a compact array of slab indices ordered by expiry; each
//! record stores its own heap position so an arbitrary timer can be
//! repositioned in O(log n).
//!
//! Cancelled timers (their completion event has gone empty) are discarded
//! lazily: the driver trims them off the heap root at the start of each
//! turn and when popping due timers.

use std::time::Instant;

use crate::event::Event;

struct TimerRecord {
    expiry: Instant,
    event: Event<()>,
    heap_pos: usize,
}

enum TimerSlot {
    Full(TimerRecord),
    Free { next: Option<u32> },
}

pub(crate) struct Timers {
    slab: Vec<TimerSlot>,
    free: Option<u32>,
    heap: Vec<u32>,
}

impl Timers {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slab: Vec::with_capacity(capacity),
            free: None,
            heap: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules `event` to fire at `expiry`.
    pub(crate) fn schedule(&mut self, expiry: Instant, event: Event<()>) {
        let id = if let Some(id) = self.free {
            match std::mem::replace(
                &mut self.slab[id as usize],
                TimerSlot::Full(TimerRecord {
                    expiry,
                    event,
                    heap_pos: self.heap.len(),
                }),
            ) {
                TimerSlot::Free { next } => self.free = next,
                TimerSlot::Full(_) => unreachable!("free list pointed at a live timer"),
            }
            id
        } else {
            let id = self.slab.len() as u32;
            self.slab.push(TimerSlot::Full(TimerRecord {
                expiry,
                event,
                heap_pos: self.heap.len(),
            }));
            id
        };
        self.heap.push(id);
        self.sift_up(self.heap.len() - 1);
    }

    /// The earliest expiry, if any timer is scheduled.
    pub(crate) fn peek_expiry(&self) -> Option<Instant> {
        self.heap.first().map(|&id| self.record(id).expiry)
    }

    /// True if the root timer's completion event has been cancelled.
    pub(crate) fn head_cancelled(&self) -> bool {
        self.heap
            .first()
            .is_some_and(|&id| !self.record(id).event.is_armed())
    }

    /// Discards cancelled timers sitting at the heap root.
    pub(crate) fn trim_cancelled_head(&mut self) {
        while self.head_cancelled() {
            drop(self.pop_head());
        }
    }

    /// Pops the root timer's event if it is due at `now`, skipping over
    /// cancelled timers.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Event<()>> {
        loop {
            let &id = self.heap.first()?;
            if self.record(id).expiry > now {
                return None;
            }
            let event = self.pop_head();
            if event.is_armed() {
                return Some(event);
            }
        }
    }

    /// Removes every timer, returning the events for the caller to cancel.
    pub(crate) fn drain_all(&mut self) -> Vec<Event<()>> {
        let mut events = Vec::with_capacity(self.heap.len());
        while !self.heap.is_empty() {
            events.push(self.pop_head());
        }
        events
    }

    fn pop_head(&mut self) -> Event<()> {
        debug_assert!(!self.heap.is_empty());
        let id = self.heap[0];
        let last = self.heap.pop().expect("heap checked non-empty");
        if !self.heap.is_empty() {
            self.heap[0] = last;
            self.set_pos(last, 0);
            self.sift_down(0);
        }
        let slot = std::mem::replace(
            &mut self.slab[id as usize],
            TimerSlot::Free { next: self.free },
        );
        self.free = Some(id);
        match slot {
            TimerSlot::Full(record) => record.event,
            TimerSlot::Free { .. } => unreachable!("heap pointed at a freed timer"),
        }
    }

    fn record(&self, id: u32) -> &TimerRecord {
        match &self.slab[id as usize] {
            TimerSlot::Full(record) => record,
            TimerSlot::Free { .. } => unreachable!("heap pointed at a freed timer"),
        }
    }

    fn expiry_of(&self, id: u32) -> Instant {
        self.record(id).expiry
    }

    fn set_pos(&mut self, id: u32, pos: usize) {
        match &mut self.slab[id as usize] {
            TimerSlot::Full(record) => record.heap_pos = pos,
            TimerSlot::Free { .. } => unreachable!("heap pointed at a freed timer"),
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.expiry_of(self.heap[parent]) <= self.expiry_of(self.heap[pos]) {
                break;
            }
            self.heap.swap(parent, pos);
            self.set_pos(self.heap[pos], pos);
            self.set_pos(self.heap[parent], parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let mut smallest = pos;
            for child in [2 * pos + 1, 2 * pos + 2] {
                if child < self.heap.len()
                    && self.expiry_of(self.heap[child]) < self.expiry_of(self.heap[smallest])
                {
                    smallest = child;
                }
            }
            if smallest == pos {
                break;
            }
            self.heap.swap(pos, smallest);
            self.set_pos(self.heap[pos], pos);
            self.set_pos(self.heap[smallest], smallest);
            pos = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::Rendezvous;
    use crate::test_util::init_test_logging;
    use std::time::Duration;

    fn armed_event(r: &Rendezvous<u32>, id: u32) -> Event<()> {
        r.make(id)
    }

    #[test]
    fn pop_due_returns_earliest_first() {
        init_test_logging();
        let r = Rendezvous::new();
        let base = Instant::now();
        let mut timers = Timers::with_capacity(4);
        timers.schedule(base + Duration::from_millis(30), armed_event(&r, 30));
        timers.schedule(base + Duration::from_millis(10), armed_event(&r, 10));
        timers.schedule(base + Duration::from_millis(20), armed_event(&r, 20));

        assert_eq!(timers.peek_expiry(), Some(base + Duration::from_millis(10)));

        let now = base + Duration::from_millis(25);
        timers.pop_due(now).expect("10ms timer due").trigger(());
        timers.pop_due(now).expect("20ms timer due").trigger(());
        assert!(timers.pop_due(now).is_none(), "30ms timer not yet due");
        assert_eq!(r.join(), Some(10));
        assert_eq!(r.join(), Some(20));
        assert_eq!(r.join(), None);
    }

    #[test]
    fn cancelled_head_is_trimmed() {
        init_test_logging();
        let r = Rendezvous::new();
        let base = Instant::now();
        let mut timers = Timers::with_capacity(4);
        let early = armed_event(&r, 1);
        timers.schedule(base + Duration::from_millis(1), early.clone());
        timers.schedule(base + Duration::from_millis(50), armed_event(&r, 2));

        early.cancel();
        assert!(timers.head_cancelled());
        timers.trim_cancelled_head();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.peek_expiry(), Some(base + Duration::from_millis(50)));
    }

    #[test]
    fn slots_are_reused_after_pop() {
        init_test_logging();
        let r = Rendezvous::new();
        let base = Instant::now();
        let mut timers = Timers::with_capacity(2);
        timers.schedule(base, armed_event(&r, 1));
        let e = timers.pop_due(base).expect("due");
        e.trigger(());
        timers.schedule(base + Duration::from_millis(5), armed_event(&r, 2));
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.slab.len(), 1, "freed slab slot was reused");
    }
}
