//! The event loop: timers, fd readiness, signals, asaps, task resumption.
//!
//! One driver lives per thread, installed by [`initialize`] and torn down
//! by [`cleanup`]. Events register through the `at_*` functions; [`once`]
//! runs exactly one turn; [`run`] iterates turns until [`stop`] or nothing
//! remains to schedule.
//!
//! # One turn
//!
//! 1. **Timer-head cleanup** — cancelled timers are trimmed off the heap
//!    root.
//! 2. **Wait budget** — zero if asaps, a due timer, or a pending signal
//!    demand immediate service; unbounded if no timers; else time to the
//!    root timer's expiry.
//! 3. **Readiness poll** — `select` on copies of the read/write sets, the
//!    signal self-pipe added to the read set.
//! 4. **Signal dispatch** — pending signals trigger their events; the
//!    unblocked rendezvous drain runs so handlers can re-arm; only then are
//!    the signals unblocked and the self-pipe drained.
//! 5. **Asap drain** — asap events fire in LIFO order.
//! 6. **Fd drain** — each ready descriptor's event fires once; its interest
//!    bit is cleared first, so a hook that re-arms is observed next turn.
//! 7. **Timer expiry** — "now" is refreshed; every due timer fires.
//! 8. **Rendezvous drain** — parked tasks whose rendezvous became ready
//!    resume, FIFO, including any enqueued during the drain itself.
//!
//! Triggers run inline but never while the driver's own state is borrowed:
//! each phase detaches the events to fire, then fires them. `EINTR` from
//! the poll is absorbed (the turn continues without fd results); any other
//! poll failure is returned from `once` as [`ErrorKind::PollFailed`].

pub(crate) mod fdset;
pub(crate) mod signal;
pub(crate) mod timer;

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Error, ErrorKind, Result};
use crate::event::Event;
use crate::rendezvous;

use fdset::{FdDir, FdSet, FdTable};
use signal::NSIGNALS;
use timer::Timers;

/// Initial capacities for the driver's growable tables.
///
/// All tables double when they overflow; the configuration only seeds them.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    timer_capacity: usize,
    fd_capacity: usize,
    asap_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            timer_capacity: 16,
            fd_capacity: 16,
            asap_capacity: 16,
        }
    }
}

impl DriverConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the timer slab capacity.
    #[must_use]
    pub const fn with_timer_capacity(mut self, capacity: usize) -> Self {
        self.timer_capacity = capacity;
        self
    }

    /// Seeds the fd table capacity (in descriptors).
    #[must_use]
    pub const fn with_fd_capacity(mut self, capacity: usize) -> Self {
        self.fd_capacity = capacity;
        self
    }

    /// Seeds the asap queue capacity.
    #[must_use]
    pub const fn with_asap_capacity(mut self, capacity: usize) -> Self {
        self.asap_capacity = capacity;
        self
    }
}

/// The per-thread event loop state.
///
/// Constructed through [`initialize`]; all interaction goes through the
/// module-level functions.
pub struct Driver {
    timers: Timers,
    fds: FdTable,
    asap: Vec<Event<()>>,
    sig_handlers: Vec<Event<()>>,
    sig_installed: [bool; NSIGNALS],
    running: bool,
    now: Instant,
}

impl Driver {
    fn with_config(config: DriverConfig) -> Self {
        Self {
            timers: Timers::with_capacity(config.timer_capacity),
            fds: FdTable::with_capacity(config.fd_capacity),
            asap: Vec::with_capacity(config.asap_capacity),
            sig_handlers: (0..NSIGNALS).map(|_| Event::default()).collect(),
            sig_installed: [false; NSIGNALS],
            running: false,
            now: Instant::now(),
        }
    }

    fn has_pending(&self) -> bool {
        !self.asap.is_empty()
            || !self.timers.is_empty()
            || self.fds.any_armed()
            || self.sig_installed.iter().any(|&i| i)
            || rendezvous::has_unblocked()
    }

    fn has_armed_signal(&self) -> bool {
        self.sig_installed.iter().any(|&i| i)
    }

    /// How long the readiness poll may wait.
    fn wait_budget(&self) -> Option<Duration> {
        if !self.asap.is_empty() || signal::any_active() || rendezvous::has_unblocked() {
            return Some(Duration::ZERO);
        }
        match self.timers.peek_expiry() {
            Some(expiry) => Some(expiry.saturating_duration_since(self.now)),
            None => {
                if self.fds.any_armed() || self.has_armed_signal() {
                    None
                } else {
                    // Nothing is registered at all; don't park in select.
                    Some(Duration::ZERO)
                }
            }
        }
    }

    /// Collects all armed events for teardown and restores signal
    /// dispositions.
    fn dismantle(&mut self) -> Vec<Event<()>> {
        let mut events = self.timers.drain_all();
        events.append(&mut self.fds.drain_all());
        events.append(&mut std::mem::take(&mut self.asap));
        for (signum, installed) in self.sig_installed.iter_mut().enumerate() {
            if *installed {
                let _ = signal::restore_default(signum as i32);
                *installed = false;
            }
        }
        events.extend(
            self.sig_handlers
                .iter_mut()
                .map(std::mem::take)
                .filter(|e| e.is_armed()),
        );
        events
    }
}

thread_local! {
    static MAIN: RefCell<Option<Driver>> = const { RefCell::new(None) };
}

fn with_driver<T>(f: impl FnOnce(&mut Driver) -> T) -> Result<T> {
    MAIN.with(|m| {
        let mut guard = m.borrow_mut();
        guard
            .as_mut()
            .map(f)
            .ok_or_else(|| Error::new(ErrorKind::DriverMissing))
    })
}

/// Installs this thread's driver with default configuration.
pub fn initialize() -> Result<()> {
    initialize_with(DriverConfig::default())
}

/// Installs this thread's driver. An existing driver is torn down first,
/// cancelling its registered events.
pub fn initialize_with(config: DriverConfig) -> Result<()> {
    let old = MAIN.with(|m| m.borrow_mut().replace(Driver::with_config(config)));
    if let Some(mut old) = old {
        for event in old.dismantle() {
            event.cancel();
        }
    }
    debug!(target: "rendez::driver", "driver initialised");
    Ok(())
}

/// Tears down this thread's driver: every registered event is cancelled
/// (its hooks observe `values = false`), parked tasks whose rendezvous
/// became ready get one final resumption, and signal dispositions are
/// restored.
pub fn cleanup() {
    let old = MAIN.with(|m| m.borrow_mut().take());
    if let Some(mut old) = old {
        for event in old.dismantle() {
            event.cancel();
        }
        debug!(target: "rendez::driver", "driver torn down");
    }
    rendezvous::drain_unblocked();
    signal::teardown();
}

/// Arms `event` to fire once when `fd` becomes readable.
///
/// One event per (fd, direction): arming replaces any previous event
/// without cancelling it. Re-arming is required after each trigger.
/// Passing a dead event clears the registration.
pub fn at_fd_read(fd: RawFd, event: Event<()>) -> Result<()> {
    with_driver(|d| d.fds.arm(fd, FdDir::Read, event))
}

/// Arms `event` to fire once when `fd` becomes writable.
pub fn at_fd_write(fd: RawFd, event: Event<()>) -> Result<()> {
    with_driver(|d| d.fds.arm(fd, FdDir::Write, event))
}

/// Arms `event` to fire at the given instant.
pub fn at_time(when: Instant, event: Event<()>) -> Result<()> {
    with_driver(|d| d.timers.schedule(when, event))
}

/// Arms `event` to fire after `delay`. A zero delay fires within the same
/// turn's timer phase.
pub fn at_delay(delay: Duration, event: Event<()>) -> Result<()> {
    let when = Instant::now() + delay;
    with_driver(|d| d.timers.schedule(when, event))
}

/// Arms `event` to fire in the next turn's asap phase, before I/O.
pub fn at_asap(event: Event<()>) -> Result<()> {
    with_driver(|d| d.asap.push(event))
}

/// Arms `event` to fire once when `signum` is delivered.
///
/// Delivery is one-shot: the OS handler resets to the default disposition
/// (`SA_RESETHAND`) and the signal stays blocked until the handler event
/// and the rendezvous it unblocked have run, so a resumed task may re-arm
/// before a second delivery is accepted. Passing a dead event restores the
/// default disposition.
pub fn at_signal(signum: i32, event: Event<()>) -> Result<()> {
    if !(0..NSIGNALS as i32).contains(&signum) {
        return Err(Error::new(ErrorKind::BadSignal).with_context(format!("signum {signum}")));
    }
    if event.is_armed() {
        signal::ensure_pipe()?;
        with_driver(|d| {
            d.sig_handlers[signum as usize] = event;
            d.sig_installed[signum as usize] = true;
        })?;
        signal::install(signum)
    } else {
        with_driver(|d| {
            d.sig_handlers[signum as usize] = Event::default();
            d.sig_installed[signum as usize] = false;
        })?;
        signal::restore_default(signum)
    }
}

/// Cancels both direction events registered for `fd` (used when the fd
/// wrapper closes a descriptor).
pub(crate) fn cancel_fd(fd: RawFd) -> Result<()> {
    let events = with_driver(|d| d.fds.take_fd(fd))?;
    for event in events {
        event.cancel();
    }
    Ok(())
}

#[allow(clippy::cast_possible_wrap)]
fn poll_readiness(
    mut rfds: FdSet,
    mut wfds: FdSet,
    nfds: RawFd,
    budget: Option<Duration>,
) -> Result<Option<(FdSet, FdSet)>> {
    let mut maxfd = nfds;
    if let Some(pipe_fd) = signal::pipe_read_fd() {
        rfds.set(pipe_fd);
        if pipe_fd + 1 > maxfd {
            maxfd = pipe_fd + 1;
        }
    }
    let mut tv = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let tvptr = match budget {
        Some(budget) => {
            tv.tv_sec = budget.as_secs() as libc::time_t;
            tv.tv_usec = libc::suseconds_t::from(budget.subsec_micros());
            std::ptr::addr_of_mut!(tv)
        }
        None => std::ptr::null_mut(),
    };
    // SAFETY: the sets are valid for maxfd descriptors and tv, when
    // non-null, points at a live timeval.
    let n = unsafe {
        libc::select(
            maxfd,
            rfds.as_mut_ptr(),
            wfds.as_mut_ptr(),
            std::ptr::null_mut(),
            tvptr,
        )
    };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(None);
        }
        return Err(Error::new(ErrorKind::PollFailed).with_source(err));
    }
    Ok(Some((rfds, wfds)))
}

/// Runs exactly one turn of the loop.
pub fn once() -> Result<()> {
    // Phases 1-2: trim cancelled timers, compute the wait budget, snapshot
    // the select sets.
    let (budget, rfds, wfds, nfds) = with_driver(|d| {
        d.timers.trim_cancelled_head();
        d.fds.decay_watermark();
        let (rfds, wfds) = d.fds.sets();
        (d.wait_budget(), rfds, wfds, d.fds.nfds())
    })?;

    // Phase 3: readiness poll. EINTR yields no fd results but the turn
    // continues, so an interrupting signal is dispatched below.
    let ready = poll_readiness(rfds, wfds, nfds, budget)?;

    // Phase 4: signal dispatch.
    if signal::any_active() {
        let active = signal::take_active();
        let events = with_driver(|d| {
            active
                .iter()
                .map(|&signum| {
                    d.sig_installed[signum as usize] = false;
                    std::mem::take(&mut d.sig_handlers[signum as usize])
                })
                .collect::<Vec<_>>()
        })?;
        for (signum, event) in active.iter().zip(events) {
            trace!(target: "rendez::driver", signum, "signal dispatched");
            event.trigger(());
        }
        // Give handlers a chance to re-arm before their signals unblock.
        rendezvous::drain_unblocked();
        signal::unblock(&active);
        signal::drain_pipe();
    }

    // Phase 5: asap drain, LIFO.
    let mut asaps = with_driver(|d| std::mem::take(&mut d.asap))?;
    if !asaps.is_empty() {
        trace!(target: "rendez::driver", count = asaps.len(), "asap drain");
    }
    while let Some(event) = asaps.pop() {
        event.trigger(());
    }

    // Phase 6: fd drain.
    if let Some((rready, wready)) = ready {
        let fired = with_driver(|d| d.fds.collect_ready(&rready, &wready))?;
        if !fired.is_empty() {
            trace!(target: "rendez::driver", count = fired.len(), "fd drain");
        }
        for event in fired {
            event.trigger(());
        }
    }

    // Phase 7: timer expiry against a refreshed clock.
    let now = Instant::now();
    with_driver(|d| d.now = now)?;
    loop {
        let due = with_driver(|d| d.timers.pop_due(now))?;
        match due {
            Some(event) => {
                trace!(target: "rendez::driver", "timer fired");
                event.trigger(());
            }
            None => break,
        }
    }

    // Phase 8: resume parked tasks.
    rendezvous::drain_unblocked();
    Ok(())
}

/// Runs turns until [`stop`] is called or nothing remains to schedule.
pub fn run() -> Result<()> {
    with_driver(|d| d.running = true)?;
    loop {
        let keep_going = with_driver(|d| {
            d.timers.trim_cancelled_head();
            d.fds.decay_watermark();
            d.running && d.has_pending()
        })?;
        if !keep_going {
            return Ok(());
        }
        once()?;
    }
}

/// Makes [`run`] return after the current turn.
pub fn stop() {
    let _ = with_driver(|d| d.running = false);
}
