//! The reference-counted file-descriptor wrapper.
//!
//! An [`Fd`] wraps a raw descriptor in event-based access functions. Many
//! wrappers may refer to the same descriptor; it is closed when the last
//! one drops, or explicitly through [`Fd::close`].
//!
//! Reads issued on one descriptor complete in issue order, and likewise
//! writes; the two directions are independent. Each direction serialises
//! through a [`MutexEvent`], and each operation is a small cooperative task
//! driven by the driver's fd-readiness primitive.
//!
//! Completion events carry an `i32` following the errno convention: a
//! non-negative byte count on success, `-errno` on failure, and
//! `-ECANCELED` when the descriptor was closed mid-operation. Closing also
//! cancels pending `at_fd_read`/`at_fd_write` registrations and fires any
//! hooks registered with [`Fd::at_close`].

use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::Rc;

use tracing::debug;

use crate::driver;
use crate::error::{Error, ErrorKind, Result};
use crate::event::Event;
use crate::rendezvous::GatherRendezvous;
use crate::sync::MutexEvent;
use crate::task::{spawn, Activation, ResumePoint};

/// Shared byte storage a read appends into.
pub type Buffer = Rc<RefCell<Vec<u8>>>;

struct FdImp {
    raw: Cell<RawFd>,
    rlock: MutexEvent,
    wlock: MutexEvent,
    at_close: RefCell<Vec<Event<()>>>,
}

impl FdImp {
    fn close(&self) -> Result<()> {
        let raw = self.raw.replace(-1);
        if raw < 0 {
            return Err(Error::new(ErrorKind::ClosedFd));
        }
        debug!(target: "rendez::fd", fd = raw, "closing descriptor");
        // SAFETY: this wrapper owns raw and nobody reuses it afterwards.
        unsafe { libc::close(raw) };
        // Cancel pending readiness interest so in-flight operations resume
        // and observe the closed descriptor.
        let _ = driver::cancel_fd(raw);
        let hooks: Vec<_> = self.at_close.borrow_mut().drain(..).collect();
        for hook in hooks {
            hook.trigger(());
        }
        Ok(())
    }
}

impl Drop for FdImp {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A reference-counted, event-based file descriptor.
#[derive(Clone)]
pub struct Fd {
    imp: Rc<FdImp>,
}

impl Fd {
    /// Takes ownership of `raw`; it is closed when the last wrapper drops.
    #[must_use]
    pub fn new(raw: RawFd) -> Self {
        Self {
            imp: Rc::new(FdImp {
                raw: Cell::new(raw),
                rlock: MutexEvent::new(),
                wlock: MutexEvent::new(),
                at_close: RefCell::new(Vec::new()),
            }),
        }
    }

    /// An invalid descriptor; every operation reports `-EBADF`.
    #[must_use]
    pub fn invalid() -> Self {
        Self::new(-1)
    }

    /// The raw descriptor value, `-1` once closed.
    #[must_use]
    pub fn raw(&self) -> RawFd {
        self.imp.raw.get()
    }

    /// True while the descriptor is open.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.imp.raw.get() >= 0
    }

    /// `0` while open, `-EBADF` otherwise.
    #[must_use]
    pub fn error(&self) -> i32 {
        if self.valid() {
            0
        } else {
            -libc::EBADF
        }
    }

    /// Puts a raw descriptor into nonblocking mode.
    pub fn make_nonblocking(raw: RawFd) -> Result<()> {
        // SAFETY: fcntl on a caller-supplied descriptor.
        unsafe {
            let flags = libc::fcntl(raw, libc::F_GETFL);
            if flags < 0 || libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) != 0 {
                return Err(Error::last_os_error(ErrorKind::DescriptorSetup));
            }
        }
        Ok(())
    }

    /// Creates a nonblocking pipe; returns `(read end, write end)`.
    pub fn pipe() -> Result<(Self, Self)> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: pipe(2) with a valid two-element array.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::last_os_error(ErrorKind::DescriptorSetup));
        }
        Self::make_nonblocking(fds[0])?;
        Self::make_nonblocking(fds[1])?;
        Ok((Self::new(fds[0]), Self::new(fds[1])))
    }

    /// Creates a nonblocking Unix stream socket pair.
    pub fn socketpair() -> Result<(Self, Self)> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: socketpair(2) with a valid two-element array.
        if unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) } != 0
        {
            return Err(Error::last_os_error(ErrorKind::DescriptorSetup));
        }
        Self::make_nonblocking(fds[0])?;
        Self::make_nonblocking(fds[1])?;
        Ok((Self::new(fds[0]), Self::new(fds[1])))
    }

    /// Registers `hook` to fire when the descriptor closes. On an
    /// already-closed descriptor the hook fires immediately.
    pub fn at_close(&self, hook: Event<()>) {
        if self.valid() {
            self.imp.at_close.borrow_mut().push(hook);
        } else {
            hook.trigger(());
        }
    }

    /// Closes the descriptor: pending reads and writes complete with
    /// `-ECANCELED`, readiness registrations are cancelled, and at-close
    /// hooks fire. Closing twice reports [`ErrorKind::ClosedFd`].
    pub fn close(&self) -> Result<()> {
        self.imp.close()
    }

    /// Reads up to `max` bytes, appending them to `buf`.
    ///
    /// `done` completes with the byte count of a single successful read
    /// (`0` means end of file), `-errno` on failure, `-EBADF` if the
    /// wrapper is invalid, or `-ECANCELED` if the descriptor closes first.
    /// Reads on one descriptor complete in issue order.
    pub fn read(&self, buf: Buffer, max: usize, done: Event<(i32,)>) {
        spawn(Rc::new(ReadOp {
            pos: ResumePoint::new(),
            imp: Rc::clone(&self.imp),
            buf,
            max,
            done: RefCell::new(Some(done)),
            wait: GatherRendezvous::volatile(),
        }));
    }

    /// Writes all of `data`.
    ///
    /// `done` completes with the total byte count once everything is
    /// written, `-errno` on failure, `-EBADF` if the wrapper is invalid, or
    /// `-ECANCELED` if the descriptor closes first. Writes on one
    /// descriptor complete in issue order.
    pub fn write(&self, data: Vec<u8>, done: Event<(i32,)>) {
        spawn(Rc::new(WriteOp {
            pos: ResumePoint::new(),
            imp: Rc::clone(&self.imp),
            data,
            written: Cell::new(0),
            done: RefCell::new(Some(done)),
            wait: GatherRendezvous::volatile(),
        }));
    }
}

impl std::fmt::Debug for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fd").field("raw", &self.raw()).finish()
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

fn retriable(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK || errno == libc::EINTR
}

struct ReadOp {
    pos: ResumePoint,
    imp: Rc<FdImp>,
    buf: Buffer,
    max: usize,
    done: RefCell<Option<Event<(i32,)>>>,
    wait: GatherRendezvous,
}

impl ReadOp {
    fn finish(&self, result: i32) {
        self.imp.rlock.release();
        if let Some(done) = self.done.borrow_mut().take() {
            done.trigger((result,));
        }
    }
}

impl Activation for ReadOp {
    fn activate(self: Rc<Self>) {
        match self.pos.get() {
            0 => {
                if self.imp.raw.get() < 0 {
                    if let Some(done) = self.done.borrow_mut().take() {
                        done.trigger((-libc::EBADF,));
                    }
                    return;
                }
                self.imp.rlock.acquire(self.wait.make());
                self.wait.block(self.clone(), 1);
            }
            1 => {
                let fd = self.imp.raw.get();
                if fd < 0 {
                    self.finish(-libc::ECANCELED);
                    return;
                }
                let mut chunk = vec![0u8; self.max];
                // SAFETY: reading into a live buffer of self.max bytes.
                let n = unsafe { libc::read(fd, chunk.as_mut_ptr().cast(), self.max) };
                if n >= 0 {
                    self.buf
                        .borrow_mut()
                        .extend_from_slice(&chunk[..n as usize]);
                    self.finish(n as i32);
                    return;
                }
                let errno = last_errno();
                if retriable(errno) {
                    if driver::at_fd_read(fd, self.wait.make()).is_err() {
                        self.finish(-libc::ECANCELED);
                        return;
                    }
                    self.wait.block(self.clone(), 1);
                    return;
                }
                self.finish(-errno);
            }
            _ => unreachable!(),
        }
    }

    fn set_resume_point(&self, pos: u32) {
        self.pos.set(pos);
    }
}

struct WriteOp {
    pos: ResumePoint,
    imp: Rc<FdImp>,
    data: Vec<u8>,
    written: Cell<usize>,
    done: RefCell<Option<Event<(i32,)>>>,
    wait: GatherRendezvous,
}

impl WriteOp {
    fn finish(&self, result: i32) {
        self.imp.wlock.release();
        if let Some(done) = self.done.borrow_mut().take() {
            done.trigger((result,));
        }
    }
}

impl Activation for WriteOp {
    fn activate(self: Rc<Self>) {
        match self.pos.get() {
            0 => {
                if self.imp.raw.get() < 0 {
                    if let Some(done) = self.done.borrow_mut().take() {
                        done.trigger((-libc::EBADF,));
                    }
                    return;
                }
                self.imp.wlock.acquire(self.wait.make());
                self.wait.block(self.clone(), 1);
            }
            1 => loop {
                let fd = self.imp.raw.get();
                if fd < 0 {
                    self.finish(-libc::ECANCELED);
                    return;
                }
                let written = self.written.get();
                if written == self.data.len() {
                    self.finish(written as i32);
                    return;
                }
                let rest = &self.data[written..];
                // SAFETY: writing from a live slice of rest.len() bytes.
                let n = unsafe { libc::write(fd, rest.as_ptr().cast(), rest.len()) };
                if n >= 0 {
                    self.written.set(written + n as usize);
                    continue;
                }
                let errno = last_errno();
                if retriable(errno) {
                    if driver::at_fd_write(fd, self.wait.make()).is_err() {
                        self.finish(-libc::ECANCELED);
                        return;
                    }
                    self.wait.block(self.clone(), 1);
                    return;
                }
                self.finish(-errno);
                return;
            },
            _ => unreachable!(),
        }
    }

    fn set_resume_point(&self, pos: u32) {
        self.pos.set(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::init_test_logging;

    #[test]
    fn invalid_wrapper_reports_ebadf() {
        init_test_logging();
        let f = Fd::invalid();
        assert!(!f.valid());
        assert_eq!(f.error(), -libc::EBADF);
        assert_eq!(
            f.close().expect_err("already closed").kind(),
            ErrorKind::ClosedFd
        );
    }

    #[test]
    fn pipe_ends_are_valid_and_close_once() {
        init_test_logging();
        let (r, w) = Fd::pipe().expect("pipe");
        assert!(r.valid() && w.valid());
        r.close().expect("first close");
        assert_eq!(
            r.close().expect_err("second close").kind(),
            ErrorKind::ClosedFd
        );
        drop(w);
    }

    #[test]
    fn at_close_hook_fires_on_close() {
        init_test_logging();
        let (r, _w) = Fd::pipe().expect("pipe");
        let observed = crate::event::Slot::new();
        let rz = crate::rendezvous::Rendezvous::<u32>::new();
        let hook = rz.make(1);
        let o = observed.clone();
        hook.on_trigger(move |values| o.set(values));
        r.at_close(hook);
        r.close().expect("close");
        assert_eq!(observed.get(), Some(true));
    }
}
