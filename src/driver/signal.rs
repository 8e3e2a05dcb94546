//! Signal plumbing: the handler trampoline, the self-pipe, and the
//! process-wide active flags.
//!
//! The OS-level handler does three async-signal-safe things: it marks the
//! signal active, writes one byte to the self-pipe so a blocking readiness
//! poll wakes even if the signal lands between budget computation and the
//! poll itself, and blocks its own signal via `sigprocmask`. The driver's
//! dispatch phase triggers the handler events, drains the unblocked
//! rendezvous so a handler may re-arm, and only then unblocks the signals.
//!
//! Handlers install with `SA_RESETHAND`: delivery is one-shot, and a second
//! raise without re-arming takes the default action.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::error::{Error, ErrorKind, Result};

/// Size of the per-signal table.
pub(crate) const NSIGNALS: usize = 32;

static SIG_ANY_ACTIVE: AtomicBool = AtomicBool::new(false);

#[allow(clippy::declare_interior_mutable_const)]
const INACTIVE: AtomicBool = AtomicBool::new(false);
static SIG_ACTIVE: [AtomicBool; NSIGNALS] = [INACTIVE; NSIGNALS];

static SIG_PIPE_READ: AtomicI32 = AtomicI32::new(-1);
static SIG_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn trampoline(signum: libc::c_int) {
    if (0..NSIGNALS as libc::c_int).contains(&signum) {
        SIG_ACTIVE[signum as usize].store(true, Ordering::Relaxed);
        SIG_ANY_ACTIVE.store(true, Ordering::Relaxed);
    }
    let wfd = SIG_PIPE_WRITE.load(Ordering::Relaxed);
    if wfd >= 0 {
        let byte = [0u8];
        // SAFETY: write(2) is async-signal-safe; the pipe is nonblocking.
        let _ = unsafe { libc::write(wfd, byte.as_ptr().cast(), 1) };
    }
    // Block this signal until the driver has run the handler event, giving
    // the resumed rendezvous a chance to install another handler first.
    // SAFETY: sigprocmask(2) is async-signal-safe.
    unsafe {
        let mut set = std::mem::zeroed::<libc::sigset_t>();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signum);
        libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

fn set_nonblocking_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on a descriptor we just created.
    unsafe {
        if libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) != 0
            || libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) != 0
        {
            return Err(Error::last_os_error(ErrorKind::PipeSetup));
        }
    }
    Ok(())
}

/// Creates the self-pipe on first use.
pub(crate) fn ensure_pipe() -> Result<()> {
    if SIG_PIPE_READ.load(Ordering::Relaxed) >= 0 {
        return Ok(());
    }
    let mut fds = [0 as RawFd; 2];
    // SAFETY: pipe(2) with a valid two-element array.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(Error::last_os_error(ErrorKind::PipeSetup));
    }
    set_nonblocking_cloexec(fds[0])?;
    set_nonblocking_cloexec(fds[1])?;
    SIG_PIPE_READ.store(fds[0], Ordering::Relaxed);
    SIG_PIPE_WRITE.store(fds[1], Ordering::Relaxed);
    Ok(())
}

/// The read end of the self-pipe, if it exists.
pub(crate) fn pipe_read_fd() -> Option<RawFd> {
    let fd = SIG_PIPE_READ.load(Ordering::Relaxed);
    (fd >= 0).then_some(fd)
}

/// Installs the trampoline for `signum` (one-shot via `SA_RESETHAND`).
pub(crate) fn install(signum: i32) -> Result<()> {
    // SAFETY: sigaction with a zeroed, then fully initialised, struct.
    unsafe {
        let mut sa = std::mem::zeroed::<libc::sigaction>();
        let handler: extern "C" fn(libc::c_int) = trampoline;
        sa.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = libc::SA_RESETHAND;
        if libc::sigaction(signum, &sa, std::ptr::null_mut()) != 0 {
            return Err(Error::last_os_error(ErrorKind::SignalSetup));
        }
    }
    Ok(())
}

/// Restores the default disposition for `signum`.
pub(crate) fn restore_default(signum: i32) -> Result<()> {
    // SAFETY: sigaction with a zeroed, then fully initialised, struct.
    unsafe {
        let mut sa = std::mem::zeroed::<libc::sigaction>();
        sa.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        if libc::sigaction(signum, &sa, std::ptr::null_mut()) != 0 {
            return Err(Error::last_os_error(ErrorKind::SignalSetup));
        }
    }
    Ok(())
}

/// True if any signal has been delivered and not yet dispatched.
pub(crate) fn any_active() -> bool {
    SIG_ANY_ACTIVE.load(Ordering::Relaxed)
}

/// Clears and returns the set of pending signal numbers.
pub(crate) fn take_active() -> Vec<i32> {
    if !SIG_ANY_ACTIVE.swap(false, Ordering::Relaxed) {
        return Vec::new();
    }
    let mut active = Vec::new();
    for (signum, flag) in SIG_ACTIVE.iter().enumerate() {
        if flag.swap(false, Ordering::Relaxed) {
            active.push(signum as i32);
        }
    }
    active
}

/// Unblocks the given signals after their handler events have run.
pub(crate) fn unblock(signums: &[i32]) {
    if signums.is_empty() {
        return;
    }
    // SAFETY: sigprocmask with a set built from valid signal numbers.
    unsafe {
        let mut set = std::mem::zeroed::<libc::sigset_t>();
        libc::sigemptyset(&mut set);
        for &signum in signums {
            libc::sigaddset(&mut set, signum);
        }
        libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
    }
}

/// Discards the wake bytes accumulated in the self-pipe.
pub(crate) fn drain_pipe() {
    let Some(fd) = pipe_read_fd() else { return };
    let mut crap = [0u8; 64];
    // SAFETY: read(2) into a stack buffer on a nonblocking descriptor.
    while unsafe { libc::read(fd, crap.as_mut_ptr().cast(), crap.len()) } > 0 {}
}

/// Closes the self-pipe and clears the active flags (driver teardown).
pub(crate) fn teardown() {
    for fd in [&SIG_PIPE_READ, &SIG_PIPE_WRITE] {
        let raw = fd.swap(-1, Ordering::Relaxed);
        if raw >= 0 {
            // SAFETY: closing a descriptor this module created.
            unsafe { libc::close(raw) };
        }
    }
    SIG_ANY_ACTIVE.store(false, Ordering::Relaxed);
    for flag in &SIG_ACTIVE {
        flag.store(false, Ordering::Relaxed);
    }
}
