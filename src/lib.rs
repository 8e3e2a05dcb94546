//! Rendez: a cooperative, single-threaded event/rendezvous runtime.
//!
//! # Overview
//!
//! Rendez lets a hand-written cooperative task suspend while awaiting named
//! future occurrences ("events"), resume when any awaited event has been
//! satisfied, and multiplex its waits over operating-system readiness: file
//! descriptors, timers, signals, and run-next-turn callbacks.
//!
//! Three pieces interlock:
//!
//! - **Events** ([`Event`]): one-shot, cancellable completion tokens with up
//!   to four typed output slots written at trigger time.
//! - **Rendezvous** ([`Rendezvous`], [`GatherRendezvous`]): synchronisation
//!   objects on which events are armed and on which exactly one suspended
//!   task may block. Completion order is preserved FIFO.
//! - **The driver** ([`driver`]): the per-thread event loop reconciling a
//!   timer heap, an fd-readiness table, a signal self-pipe, an asap queue,
//!   and the queue of rendezvous whose parked tasks are ready to resume.
//!
//! # Core guarantees
//!
//! - **One-shot events**: a second trigger (or cancel) of the same event is
//!   a silent no-op; output slots keep the first trigger's values.
//! - **FIFO completion**: identifiers come back from [`Rendezvous::join`] in
//!   exactly the order their events fired.
//! - **Cancellation is observable**: cancelling is triggering with
//!   `values = false`; at-trigger hooks still fire and parked tasks resume.
//! - **Deterministic turn order**: within one driver turn, signals fire
//!   before asaps, asaps before fd readiness, fds before timers, and all
//!   four before any parked task resumes.
//!
//! # Module structure
//!
//! - [`event`]: events, output slots, the value-tuple trait
//! - [`rendezvous`]: the three rendezvous flavours and the unblocked queue
//! - [`task`]: the closure activation protocol for cooperative tasks
//! - [`combinator`]: derived events (`distribute`, `bind`)
//! - [`driver`]: the event loop and its `at_*` registration surface
//! - [`sync`]: the cooperative event-queue mutex
//! - [`fd`]: the reference-counted file-descriptor wrapper
//! - [`error`]: error types
//!
//! # Scheduling model
//!
//! Single-threaded and cooperative. One driver per thread; every trigger,
//! hook, and task activation runs inline on that thread. Only the signal
//! flags use atomic storage, because they are written from a signal handler.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod combinator;
pub mod driver;
pub mod error;
pub mod event;
pub mod fd;
pub mod rendezvous;
pub mod sync;
pub mod task;
pub mod test_util;

pub use combinator::{bind, distribute};
pub use driver::{
    at_asap, at_delay, at_fd_read, at_fd_write, at_signal, at_time, cleanup, initialize,
    initialize_with, once, run, stop, Driver, DriverConfig,
};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use event::{Event, Slot, Values};
pub use fd::Fd;
pub use rendezvous::{GatherRendezvous, Rendezvous};
pub use sync::MutexEvent;
pub use task::{spawn, Activation};
