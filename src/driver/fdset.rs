//! The fd-readiness table and its select-set mirrors.
//!
//! Events are stored at index `fd*2 + direction` (0 = read, 1 = write); a
//! pair of [`FdSet`]s mirrors "slot is armed" so the readiness poll can
//! work on plain copies. `nfds` is one past the largest armed descriptor
//! and decays lazily as events at the top complete.

use std::os::unix::io::RawFd;

use crate::event::Event;

/// A safe wrapper over `libc::fd_set`.
#[derive(Clone, Copy)]
pub(crate) struct FdSet {
    raw: libc::fd_set,
}

impl FdSet {
    pub(crate) fn new() -> Self {
        // SAFETY: fd_set is a plain bitmask structure; FD_ZERO initialises
        // every bit of the zeroed storage.
        unsafe {
            let mut raw = std::mem::zeroed::<libc::fd_set>();
            libc::FD_ZERO(&mut raw);
            Self { raw }
        }
    }

    pub(crate) fn set(&mut self, fd: RawFd) {
        debug_assert!((0..libc::FD_SETSIZE as RawFd).contains(&fd));
        // SAFETY: fd is within FD_SETSIZE.
        unsafe { libc::FD_SET(fd, &mut self.raw) }
    }

    pub(crate) fn clear(&mut self, fd: RawFd) {
        debug_assert!((0..libc::FD_SETSIZE as RawFd).contains(&fd));
        // SAFETY: fd is within FD_SETSIZE.
        unsafe { libc::FD_CLR(fd, &mut self.raw) }
    }

    pub(crate) fn contains(&self, fd: RawFd) -> bool {
        debug_assert!((0..libc::FD_SETSIZE as RawFd).contains(&fd));
        // SAFETY: fd is within FD_SETSIZE; FD_ISSET only reads.
        unsafe { libc::FD_ISSET(fd, &self.raw) }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.raw
    }
}

/// Direction of fd interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FdDir {
    Read = 0,
    Write = 1,
}

pub(crate) struct FdTable {
    /// Indexed by `fd*2 + direction`.
    events: Vec<Event<()>>,
    read_set: FdSet,
    write_set: FdSet,
    /// One past the largest armed descriptor.
    nfds: RawFd,
}

impl FdTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity * 2),
            read_set: FdSet::new(),
            write_set: FdSet::new(),
            nfds: 0,
        }
    }

    fn ensure(&mut self, fd: RawFd) {
        let need = (fd as usize) * 2 + 2;
        if self.events.len() < need {
            let mut cap = self.events.len().max(16);
            while cap < need {
                cap *= 2;
            }
            self.events.resize_with(cap, Event::default);
        }
    }

    fn dir_set(&mut self, dir: FdDir) -> &mut FdSet {
        match dir {
            FdDir::Read => &mut self.read_set,
            FdDir::Write => &mut self.write_set,
        }
    }

    /// Arms (or clears, for a dead event) one-shot interest in `fd`.
    pub(crate) fn arm(&mut self, fd: RawFd, dir: FdDir, event: Event<()>) {
        assert!(
            (0..libc::FD_SETSIZE as RawFd).contains(&fd),
            "descriptor outside the select set"
        );
        self.ensure(fd);
        let armed = event.is_armed();
        self.events[fd as usize * 2 + dir as usize] = if armed { event } else { Event::default() };
        if armed {
            self.dir_set(dir).set(fd);
            if fd >= self.nfds {
                self.nfds = fd + 1;
            }
        } else {
            self.dir_set(dir).clear(fd);
        }
    }

    /// Lets the watermark decay past descriptors whose events are gone.
    pub(crate) fn decay_watermark(&mut self) {
        while self.nfds > 0 {
            let fd = (self.nfds - 1) as usize;
            if self.events.len() > fd * 2 + 1
                && (self.events[fd * 2].is_armed() || self.events[fd * 2 + 1].is_armed())
            {
                break;
            }
            self.nfds -= 1;
        }
    }

    pub(crate) fn nfds(&self) -> RawFd {
        self.nfds
    }

    pub(crate) fn sets(&self) -> (FdSet, FdSet) {
        (self.read_set, self.write_set)
    }

    pub(crate) fn any_armed(&self) -> bool {
        self.nfds > 0
    }

    /// Collects the events for every descriptor reported ready, clearing
    /// the registered bits. An event re-armed from within a hook re-sets
    /// its bit; the next turn observes it.
    pub(crate) fn collect_ready(&mut self, rready: &FdSet, wready: &FdSet) -> Vec<Event<()>> {
        let mut fired = Vec::new();
        for fd in 0..self.nfds {
            if rready.contains(fd) {
                self.read_set.clear(fd);
                fired.push(std::mem::take(&mut self.events[fd as usize * 2]));
            }
            if wready.contains(fd) {
                self.write_set.clear(fd);
                fired.push(std::mem::take(&mut self.events[fd as usize * 2 + 1]));
            }
        }
        fired
    }

    /// Removes both direction events for `fd`, for the caller to cancel.
    pub(crate) fn take_fd(&mut self, fd: RawFd) -> Vec<Event<()>> {
        let mut taken = Vec::new();
        if (0..libc::FD_SETSIZE as RawFd).contains(&fd) && self.events.len() > fd as usize * 2 + 1 {
            self.read_set.clear(fd);
            self.write_set.clear(fd);
            for dir in [FdDir::Read, FdDir::Write] {
                let e = std::mem::take(&mut self.events[fd as usize * 2 + dir as usize]);
                if e.is_armed() {
                    taken.push(e);
                }
            }
        }
        taken
    }

    /// Removes every armed event, for driver teardown.
    pub(crate) fn drain_all(&mut self) -> Vec<Event<()>> {
        self.read_set = FdSet::new();
        self.write_set = FdSet::new();
        self.nfds = 0;
        self.events
            .drain(..)
            .filter(Event::is_armed)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::Rendezvous;
    use crate::test_util::init_test_logging;

    #[test]
    fn fdset_roundtrip() {
        init_test_logging();
        let mut set = FdSet::new();
        assert!(!set.contains(3));
        set.set(3);
        assert!(set.contains(3));
        set.clear(3);
        assert!(!set.contains(3));
    }

    #[test]
    fn arm_tracks_watermark_and_bits() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let mut table = FdTable::with_capacity(4);
        let e = r.make(0);
        table.arm(5, FdDir::Read, e.clone());
        assert_eq!(table.nfds(), 6);
        assert!(table.sets().0.contains(5));
        assert!(!table.sets().1.contains(5));

        e.cancel();
        table.decay_watermark();
        assert_eq!(table.nfds(), 0);
    }

    #[test]
    fn arming_dead_event_clears_interest() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let mut table = FdTable::with_capacity(4);
        table.arm(2, FdDir::Write, r.make(0));
        assert!(table.sets().1.contains(2));
        table.arm(2, FdDir::Write, Event::default());
        assert!(!table.sets().1.contains(2));
    }

    #[test]
    fn collect_ready_clears_bits_and_returns_events() {
        init_test_logging();
        let r = Rendezvous::<u32>::new();
        let mut table = FdTable::with_capacity(4);
        table.arm(1, FdDir::Read, r.make(10));
        table.arm(1, FdDir::Write, r.make(11));

        let mut ready = FdSet::new();
        ready.set(1);
        let fired = table.collect_ready(&ready, &ready);
        assert_eq!(fired.len(), 2);
        for e in fired {
            e.trigger(());
        }
        assert_eq!(r.join(), Some(10));
        assert_eq!(r.join(), Some(11));
        assert!(!table.sets().0.contains(1));
        assert!(!table.sets().1.contains(1));
    }
}
